//! Test fixtures and control plane helpers.
//!
//! Provides builders for `CronTab` objects, pre-seeded in-memory control
//! planes and JSON seed files.

use ctrlkit_api::{CronTab, CronTabSpec, ListWatch, ObjectMeta};
use ctrlkit_apiserver::{ApiServer, LocalClient, ServerConfig};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Creates a `CronTab` with a default schedule.
pub fn crontab(namespace: &str, name: &str) -> CronTab {
    CronTab::new(namespace, name, spec("*/5 * * * *", 1))
}

/// Creates a `CronTab` carrying a resource version, as if read back from
/// the control plane.
pub fn crontab_at(namespace: &str, name: &str, resource_version: u64) -> CronTab {
    CronTab {
        metadata: ObjectMeta::new(namespace, name).with_resource_version(resource_version),
        spec: spec("*/5 * * * *", 1),
    }
}

/// Creates a spec with the given schedule and replica count.
pub fn spec(cron_spec: &str, replicas: i32) -> CronTabSpec {
    CronTabSpec {
        cron_spec: cron_spec.to_string(),
        image: "registry.local/cron-runner:1.0".to_string(),
        replicas,
    }
}

/// Creates `count` crontabs spread over `namespaces` namespaces.
pub fn crontabs(count: usize, namespaces: usize) -> Vec<CronTab> {
    let namespaces = namespaces.max(1);
    (0..count)
        .map(|i| crontab(&format!("ns-{}", i % namespaces), &format!("crontab-{i}")))
        .collect()
}

/// A control plane with a client pointed at it.
pub struct TestControlPlane {
    /// The server, for driving writes and faults.
    pub server: Arc<ApiServer<CronTab>>,
}

impl TestControlPlane {
    /// Creates an empty control plane.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates an empty control plane with `config`.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: Arc::new(ApiServer::new(config)),
        }
    }

    /// Creates a control plane seeded with `objects`.
    pub fn seeded(objects: Vec<CronTab>) -> Self {
        let server = ApiServer::with_objects(ServerConfig::default(), objects)
            .expect("Failed to seed control plane");
        Self {
            server: Arc::new(server),
        }
    }

    /// Returns a client for informers.
    pub fn client(&self) -> Arc<dyn ListWatch<CronTab>> {
        Arc::new(LocalClient::new(Arc::clone(&self.server)))
    }
}

impl Default for TestControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `objects` to a temporary JSON seed file.
///
/// The file is removed when the returned handle is dropped.
pub fn seed_file(objects: &[CronTab]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create seed file");
    let json = serde_json::to_vec_pretty(objects).expect("Failed to encode seed objects");
    file.write_all(&json).expect("Failed to write seed file");
    file.flush().expect("Failed to flush seed file");
    file
}
