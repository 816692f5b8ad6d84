//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain`; never on `crate::infra`
//! or `crate::server`.

pub mod ports;
pub mod services;

pub use ports::{CommandRunner, Hypervisor, WorkspaceMetadata, WorkspaceStore};
pub use services::lifecycle::{CreateRequest, DeleteOutcome, WorkspaceManager};
pub use services::registry::{ProxyEntry, Registry, RouteTable};
