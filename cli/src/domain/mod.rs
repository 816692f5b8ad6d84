//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::server`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod error;
pub mod platform;
pub mod route;
pub mod workspace;

pub use error::{ErrorKind, WorkspaceError};
pub use route::{RoutePattern, RouteTarget};
pub use workspace::{
    ResourceSpec, clamp_tail, generate_password, resolve_password, validate_name,
    validate_password,
};
