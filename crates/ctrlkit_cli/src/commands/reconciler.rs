//! The `CronTab` sync handler run by the CLI.

use ctrlkit_api::{CronTab, CronTabSpec, ObjectKey, Resource};
use ctrlkit_runtime::{Lister, SyncError, SyncHandler, SyncResult};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const MACROS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Checks that `spec` is a five-field cron expression or a macro.
pub fn validate_schedule(spec: &str) -> Result<(), String> {
    let spec = spec.trim();
    if spec.starts_with('@') {
        return if MACROS.contains(&spec) {
            Ok(())
        } else {
            Err(format!("unknown schedule macro {spec:?}"))
        };
    }

    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "schedule {spec:?} has {} fields, expected 5",
            fields.len()
        ));
    }
    for field in fields {
        let valid = field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'));
        if !valid {
            return Err(format!("invalid schedule field {field:?}"));
        }
    }
    Ok(())
}

fn validate(spec: &CronTabSpec) -> Result<(), String> {
    validate_schedule(&spec.cron_spec)?;
    if spec.image.trim().is_empty() {
        return Err("image must not be empty".into());
    }
    if spec.replicas < 0 {
        return Err(format!("replicas must not be negative, got {}", spec.replicas));
    }
    Ok(())
}

/// Validates each crontab and records the resource version it last
/// reconciled. Deleted crontabs are dropped from the record.
///
/// With a non-zero failure rate, syncs fail at random with a retryable
/// error so that backoff can be observed.
#[derive(Clone, Default)]
pub struct CronTabReconciler {
    observed: Arc<Mutex<HashMap<ObjectKey, u64>>>,
    failure_rate: f64,
}

impl CronTabReconciler {
    /// Creates a reconciler that never fails on purpose.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the probability of an injected failure, clamped to `0..=1`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Number of crontabs currently reconciled.
    pub fn observed_count(&self) -> usize {
        self.observed.lock().len()
    }

    /// Resource version last reconciled for `key`.
    pub fn observed_version(&self, key: &ObjectKey) -> Option<u64> {
        self.observed.lock().get(key).copied()
    }
}

impl SyncHandler<CronTab> for CronTabReconciler {
    fn sync(&self, key: &ObjectKey, cache: &Lister<CronTab>) -> SyncResult {
        let Some(crontab) = cache.get(key) else {
            if self.observed.lock().remove(key).is_some() {
                info!(key = %key, "crontab deleted, cleaned up");
            }
            return Ok(());
        };

        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(SyncError::retry(format!("injected failure for {key}")));
        }

        validate(&crontab.spec)
            .map_err(|reason| SyncError::permanent(format!("crontab {key}: {reason}")))?;

        let version = crontab.resource_version();
        let previous = self.observed.lock().insert(key.clone(), version);
        debug!(
            key = %key,
            version,
            previous = ?previous,
            schedule = %crontab.spec.cron_spec,
            replicas = crontab.spec.replicas,
            "crontab reconciled"
        );
        Ok(())
    }
}
