//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ctrlkit_api::ObjectKey;
use ctrlkit_runtime::{Informer, StopSignal};
use ctrlkit_testkit::fixtures::{crontabs, TestControlPlane};
use ctrlkit_testkit::integration::{fast_informer_config, wait_for};
use rand::Rng;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Generates the keys of `crontabs(count, namespaces)`.
pub fn generate_keys(count: usize, namespaces: usize) -> Vec<ObjectKey> {
    let namespaces = namespaces.max(1);
    (0..count)
        .map(|i| ObjectKey::new(format!("ns-{}", i % namespaces), format!("crontab-{i}")))
        .collect()
}

/// Picks `count` keys from `keys` at random, with repeats.
pub fn sample_keys(keys: &[ObjectKey], count: usize) -> Vec<ObjectKey> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| keys[rng.gen_range(0..keys.len())].clone())
        .collect()
}

/// An informer whose cache holds `objects` crontabs, kept running until
/// dropped.
pub struct SyncedInformer {
    /// Control plane the informer watches.
    pub plane: TestControlPlane,
    /// The synced informer.
    pub informer: Arc<Informer<ctrlkit_api::CronTab>>,
    stop: StopSignal,
    handle: Option<JoinHandle<ctrlkit_runtime::RuntimeResult<()>>>,
}

impl SyncedInformer {
    /// Seeds a control plane and waits for an informer to sync it.
    pub fn start(objects: usize, namespaces: usize) -> Self {
        let plane = TestControlPlane::seeded(crontabs(objects, namespaces));
        let informer = Arc::new(
            Informer::new(plane.client(), fast_informer_config()).expect("invalid informer config"),
        );
        let stop = StopSignal::new();
        let handle = Arc::clone(&informer)
            .start(stop.clone())
            .expect("failed to start informer");
        assert!(
            wait_for(Duration::from_secs(10), || informer.has_synced()),
            "informer did not sync"
        );
        Self {
            plane,
            informer,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for SyncedInformer {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
