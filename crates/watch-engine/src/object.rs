//! Watched object identity, resource versions and the kind-erased snapshot
//! handed to dispatchers.

use crate::kind::ResourceKind;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounds every typed object flowing through a reconciliation loop satisfies.
///
/// Implemented for all statically typed Kubernetes resources.
pub trait WatchedObject:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static
{
}

impl<K> WatchedObject for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static
{
}

/// Stable identity of a watched object: namespace + name, or name alone for
/// cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Extract the key from any Kubernetes resource.
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Opaque per-kind change token issued by the API server.
///
/// Kubernetes documents resource versions as opaque, but in practice they are
/// etcd revisions. Comparison is numeric when both sides parse, otherwise any
/// difference is taken as newer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap a raw version string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Version of a resource's metadata, empty when unset.
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self(obj.resource_version().unwrap_or_default())
    }

    /// Raw version string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no version was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` supersedes `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &ResourceVersion) -> bool {
        if self.is_empty() {
            return false;
        }
        if other.is_empty() {
            return true;
        }
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(mine), Ok(theirs)) => mine > theirs,
            _ => self.0 != other.0,
        }
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Kind-erased view of an object passed to notification backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    /// Kind the object belongs to.
    pub kind: ResourceKind,
    /// Object identity.
    pub key: ObjectKey,
    /// Version the snapshot was taken at.
    pub resource_version: ResourceVersion,
    /// Full object as JSON, without `metadata.managedFields`.
    pub object: serde_json::Value,
}

impl ObjectSnapshot {
    /// Build a snapshot from a typed resource.
    pub fn from_resource<K>(kind: ResourceKind, obj: &K) -> Self
    where
        K: Resource + Serialize,
    {
        let mut object = serde_json::to_value(obj).unwrap_or(serde_json::Value::Null);
        strip_managed_fields(&mut object);
        Self {
            kind,
            key: ObjectKey::from_resource(obj),
            resource_version: ResourceVersion::of(obj),
            object,
        }
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}
