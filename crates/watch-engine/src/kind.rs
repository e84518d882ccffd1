//! Watched resource kinds.
//!
//! The set is fixed at compile time. Each variant selects the API endpoint and
//! the typed decoder the orchestrator instantiates the generic loop with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resource kind the engine knows how to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// `core/v1` Pod
    Pod,
    /// `core/v1` Service
    Service,
    /// `core/v1` ReplicationController
    ReplicationController,
    /// `apps/v1` Deployment
    Deployment,
    /// `batch/v1` Job
    Job,
    /// `core/v1` PersistentVolume (cluster-scoped)
    PersistentVolume,
}

impl ResourceKind {
    /// Every supported kind.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Pod,
        ResourceKind::Service,
        ResourceKind::ReplicationController,
        ResourceKind::Deployment,
        ResourceKind::Job,
        ResourceKind::PersistentVolume,
    ];

    /// API plural used in endpoint paths.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Service => "services",
            ResourceKind::ReplicationController => "replicationcontrollers",
            ResourceKind::Deployment => "deployments",
            ResourceKind::Job => "jobs",
            ResourceKind::PersistentVolume => "persistentvolumes",
        }
    }

    /// Whether objects of this kind live in a namespace.
    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::PersistentVolume)
    }

    /// Whether update notifications are reported for this kind by default.
    ///
    /// Only services report updates out of the box; the mirror still tracks
    /// updates for every kind.
    #[must_use]
    pub fn notifies_updates(self) -> bool {
        matches!(self, ResourceKind::Service)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "pod" | "pods" | "po" => Ok(ResourceKind::Pod),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            "replicationcontroller" | "replicationcontrollers" | "rc" => {
                Ok(ResourceKind::ReplicationController)
            }
            "deployment" | "deployments" | "deploy" => Ok(ResourceKind::Deployment),
            "job" | "jobs" => Ok(ResourceKind::Job),
            "persistentvolume" | "persistentvolumes" | "pv" => Ok(ResourceKind::PersistentVolume),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings() {
        assert_eq!("pods".parse::<ResourceKind>().unwrap(), ResourceKind::Pod);
        assert_eq!("Service".parse::<ResourceKind>().unwrap(), ResourceKind::Service);
        assert_eq!(
            "replication-controller".parse::<ResourceKind>().unwrap(),
            ResourceKind::ReplicationController
        );
        assert_eq!(
            "persistentVolume".parse::<ResourceKind>().unwrap(),
            ResourceKind::PersistentVolume
        );
        assert!("ingress".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_scope_and_update_defaults() {
        assert!(!ResourceKind::PersistentVolume.is_namespaced());
        assert!(ResourceKind::Job.is_namespaced());
        assert!(ResourceKind::Service.notifies_updates());
        assert!(!ResourceKind::Pod.notifies_updates());
    }
}
