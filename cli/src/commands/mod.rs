//! Command implementations

pub mod service;
pub mod version;
