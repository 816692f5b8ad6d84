//! Application services: use-case orchestration over the ports.

pub mod lifecycle;
pub mod provision;
pub mod registry;
