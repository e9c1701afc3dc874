//! Random writes against the control plane.

use ctrlkit_api::{CronTab, CronTabSpec, ObjectKey, Resource};
use ctrlkit_apiserver::ApiServer;
use ctrlkit_runtime::StopSignal;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Namespace used for crontabs created by churn.
pub const CHURN_NAMESPACE: &str = "churn";

/// Counts of writes issued by [`run_churn`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChurnStats {
    /// Objects created.
    pub created: u64,
    /// Objects updated.
    pub updated: u64,
    /// Objects deleted.
    pub deleted: u64,
}

/// Issues one random write every `interval` until `stop` fires.
///
/// Updates bump the replica count of a random object; creates and deletes
/// keep the population moving.
pub fn run_churn(
    server: &Arc<ApiServer<CronTab>>,
    interval: Duration,
    stop: &StopSignal,
) -> ChurnStats {
    let mut rng = rand::thread_rng();
    let mut stats = ChurnStats::default();
    let mut next_id = 0u64;

    while !stop.wait_timeout(interval) {
        let keys: Vec<ObjectKey> = server
            .list()
            .map(|list| list.items.iter().map(|obj| obj.key()).collect())
            .unwrap_or_default();

        let roll: u8 = rng.gen_range(0..10);
        let result = match keys.choose(&mut rng) {
            Some(key) if roll < 6 => server.get(key).and_then(|mut obj| {
                obj.spec.replicas = rng.gen_range(0..5);
                server.update(obj).map(|_| stats.updated += 1)
            }),
            Some(key) if roll < 8 => server.delete(key).map(|_| stats.deleted += 1),
            _ => {
                next_id += 1;
                let spec = CronTabSpec {
                    cron_spec: "*/10 * * * *".into(),
                    image: "registry.local/cron-runner:1.0".into(),
                    replicas: 1,
                };
                server
                    .create(CronTab::new(CHURN_NAMESPACE, format!("churn-{next_id}"), spec))
                    .map(|_| stats.created += 1)
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "churn write failed");
        }
    }

    debug!(?stats, "churn stopped");
    stats
}
