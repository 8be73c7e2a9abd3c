//! Workload domain types.
//!
//! A workload is owned by the cluster control plane; spindebug only reads and
//! writes its image and observes replica readiness.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Namespace-qualified workload name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Snapshot of a live workload as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub key: WorkloadKey,
    /// Artifact reference currently deployed, exactly as stored by the control plane.
    pub image: String,
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
}

impl Workload {
    /// Ready once every desired replica reports ready.
    pub fn is_ready(&self) -> bool {
        self.ready_replicas == self.replicas
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(replicas: i32, ready: i32) -> Workload {
        Workload {
            key: WorkloadKey::new("default", "hello"),
            image: "ghcr.io/spinkube/hello:v1".to_string(),
            replicas,
            ready_replicas: ready,
        }
    }

    #[test]
    fn key_display() {
        assert_eq!(WorkloadKey::new("apps", "web").to_string(), "apps/web");
    }

    #[test]
    fn readiness_requires_equal_counts() {
        assert!(!workload(2, 1).is_ready());
        assert!(workload(2, 2).is_ready());
    }
}
