//! Property-based test generators using proptest.
//!
//! Provides strategies for object identities, `CronTab` specs and
//! sequences of control plane writes.

use ctrlkit_api::{CronTab, CronTabSpec, ObjectKey, ObjectMeta};
use ctrlkit_apiserver::ApiServer;
use proptest::prelude::*;

/// Strategy for valid object names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for namespaces, including the empty (cluster-scoped) one.
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        1 => Just(String::new()),
        4 => prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("Invalid regex"),
    ]
}

/// Strategy for object keys.
pub fn object_key_strategy() -> impl Strategy<Value = ObjectKey> {
    (namespace_strategy(), name_strategy()).prop_map(|(ns, name)| ObjectKey::new(ns, name))
}

/// Strategy for `CronTab` specs.
pub fn crontab_spec_strategy() -> impl Strategy<Value = CronTabSpec> {
    (
        prop::sample::select(vec!["* * * * *", "*/5 * * * *", "0 3 * * *", "@hourly"]),
        prop::string::string_regex("[a-z]{1,8}:[0-9]\\.[0-9]").expect("Invalid regex"),
        0i32..10,
    )
        .prop_map(|(cron_spec, image, replicas)| CronTabSpec {
            cron_spec: cron_spec.to_string(),
            image,
            replicas,
        })
}

/// Strategy for `CronTab` objects with resource version zero.
pub fn crontab_strategy() -> impl Strategy<Value = CronTab> {
    (namespace_strategy(), name_strategy(), crontab_spec_strategy()).prop_map(
        |(namespace, name, spec)| CronTab {
            metadata: ObjectMeta::new(namespace, name),
            spec,
        },
    )
}

/// A write against the control plane, addressing one of a small pool of
/// names so that creates, updates and deletes collide.
#[derive(Debug, Clone)]
pub enum ChurnOp {
    /// Create the object, or update it if it exists.
    Apply {
        /// Index into the name pool.
        slot: u8,
        /// Replica count to write.
        replicas: i32,
    },
    /// Delete the object if it exists.
    Delete {
        /// Index into the name pool.
        slot: u8,
    },
}

impl ChurnOp {
    /// Name addressed by this operation.
    pub fn name(&self) -> String {
        let slot = match self {
            ChurnOp::Apply { slot, .. } | ChurnOp::Delete { slot } => slot,
        };
        format!("churn-{slot}")
    }

    /// Applies the operation in namespace `namespace`.
    ///
    /// Returns true if the control plane changed.
    pub fn apply(&self, server: &ApiServer<CronTab>, namespace: &str) -> bool {
        let key = ObjectKey::new(namespace, self.name());
        match self {
            ChurnOp::Apply { replicas, .. } => {
                let mut obj = CronTab::new(namespace, self.name(), CronTabSpec::default());
                obj.spec.replicas = *replicas;
                match server.get(&key) {
                    Ok(_) => server.update(obj).is_ok(),
                    Err(_) => server.create(obj).is_ok(),
                }
            }
            ChurnOp::Delete { .. } => server.delete(&key).is_ok(),
        }
    }
}

/// Strategy for churn operations over `slots` names.
pub fn churn_op_strategy(slots: u8) -> impl Strategy<Value = ChurnOp> {
    let slots = slots.max(1);
    prop_oneof![
        3 => (0..slots, 0i32..5).prop_map(|(slot, replicas)| ChurnOp::Apply { slot, replicas }),
        1 => (0..slots).prop_map(|slot| ChurnOp::Delete { slot }),
    ]
}

/// Strategy for a sequence of churn operations.
pub fn churn_sequence_strategy(
    slots: u8,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ChurnOp>> {
    prop::collection::vec(churn_op_strategy(slots), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for tests that start threads per case.
    #[must_use]
    pub fn threaded() -> Self {
        Self {
            cases: 8,
            max_shrink_iters: 20,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
