//! The `CronTab` example resource.

use crate::meta::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

/// Desired state of a `CronTab`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTabSpec {
    /// Cron schedule expression, e.g. `*/5 * * * *`.
    pub cron_spec: String,
    /// Container image to run on schedule.
    pub image: String,
    /// Number of replicas per run.
    pub replicas: i32,
}

/// A scheduled job declared on the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTab {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: CronTabSpec,
}

impl CronTab {
    /// Creates a crontab with the given identity and spec.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: CronTabSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
        }
    }
}

impl Resource for CronTab {
    const KIND: &'static str = "CronTab";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
