use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provisioning state of a workspace.
///
/// `Requested -> Provisioning -> Ready | Failed`. A deleted workspace has no
/// directory and therefore no state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CreationState {
    Requested,
    Provisioning,
    Ready,
    Failed,
}

impl CreationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for CreationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle record persisted next to the workspace (`state.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateRecord {
    pub state: CreationState,
    pub updated_at: DateTime<Utc>,
    /// Exit code of the provisioning script, once it has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl StateRecord {
    #[must_use]
    pub fn new(state: CreationState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            exit_code: None,
        }
    }

    #[must_use]
    pub fn finished(state: CreationState, exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            ..Self::new(state)
        }
    }
}

/// Envelope shared by every control-plane response.
///
/// `ret` is `1` on success and `0` on failure; `msg` is always human readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub ret: u8,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(msg: impl Into<String>, data: T) -> Self {
        Self {
            ret: 1,
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            ret: 0,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Result of a successful create request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedWorkspace {
    pub name: String,
    pub pass: String,
}

/// Creation marker plus the tail of the provisioning log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreationLog {
    pub create: String,
    pub log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CreationState>,
}

/// One row of the workspace listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceSummary {
    pub name: String,
    pub create: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CreationState>,
    /// Instance state as reported by multipass (`Running`, `Stopped`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceList {
    pub list: Vec<WorkspaceSummary>,
}

/// Local metadata merged with live hypervisor detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub create: String,
    pub pass: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CreationState>,
    pub info: InstanceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceStateView {
    pub name: String,
    pub state: CreationState,
}

// ── multipass documents ──────────────────────────────────────────────────────

/// `multipass info [--all] --format json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultipassInfo {
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub info: BTreeMap<String, InstanceInfo>,
}

/// Detail of a single multipass instance.
///
/// Fields multipass adds in newer releases are kept in `extra` so they reach
/// API clients unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub image_release: String,
    #[serde(default)]
    pub image_hash: String,
    #[serde(default)]
    pub cpu_count: String,
    #[serde(default)]
    pub load: Vec<f64>,
    #[serde(default)]
    pub disks: BTreeMap<String, ResourceUsage>,
    #[serde(default)]
    pub memory: ResourceUsage,
    #[serde(default)]
    pub mounts: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl InstanceInfo {
    /// First IPv4 address, if the instance has one.
    #[must_use]
    pub fn primary_ipv4(&self) -> Option<&str> {
        self.ipv4.first().map(String::as_str).filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<Quantity>,
}

/// multipass reports sizes as numbers for memory and as strings for disks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Quantity {
    Bytes(u64),
    Text(String),
}
