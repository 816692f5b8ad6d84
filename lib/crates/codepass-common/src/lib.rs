pub mod config;
pub mod types;

pub use config::{DEFAULT_BACKEND_PORT, ServiceConfig};
pub use types::*;
