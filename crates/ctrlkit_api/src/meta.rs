//! Object identity.

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metadata common to every remote object.
///
/// Only these three fields are ever inspected by the controller runtime.
/// Everything else about an object is opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace; empty for cluster-scoped objects.
    #[serde(default)]
    pub namespace: String,
    /// Name, unique within the namespace.
    pub name: String,
    /// Monotonically increasing version assigned by the control plane.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    /// Creates metadata for a namespaced object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version: 0,
        }
    }

    /// Sets the resource version.
    pub fn with_resource_version(mut self, resource_version: u64) -> Self {
        self.resource_version = resource_version;
        self
    }
}

/// The dedup key of an object: `namespace/name`, or `name` when
/// cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Creates a key. An empty namespace yields a cluster-scoped key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            name: name.into(),
        }
    }

    /// Creates a cluster-scoped key.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Builds the key of the object described by `meta`.
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self::new(meta.namespace.clone(), meta.name.clone())
    }

    /// Parses `namespace/name` or `name`.
    pub fn parse(key: &str) -> ApiResult<Self> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster(name)),
            (Some(namespace), Some(name), None) if !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ApiError::InvalidKey(key.to_string())),
        }
    }

    /// Returns the namespace, if namespaced.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A kind of object that can be listed and watched.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind name used in logs.
    const KIND: &'static str;

    /// Returns the object's metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Returns the object's metadata mutably.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Returns the dedup key.
    fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.meta())
    }

    /// Returns the resource version.
    fn resource_version(&self) -> u64 {
        self.meta().resource_version
    }
}
