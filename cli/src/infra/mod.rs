//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution,
//! multipass CLI calls and the on-disk workspace store.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::server` are forbidden.

pub mod command_runner;
pub mod multipass;
pub mod store;
