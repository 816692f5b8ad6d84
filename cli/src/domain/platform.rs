//! Host platform checks performed before the service starts.

use anyhow::Result;

/// Operating systems on which multipass can host workspaces for us.
const SUPPORTED_OS: &[&str] = &["linux", "macos"];

/// Check that the host operating system is supported.
///
/// # Errors
///
/// Returns an error naming the detected OS if it is not Linux or macOS.
pub fn check_platform() -> Result<()> {
    check_os(std::env::consts::OS)
}

fn check_os(os: &str) -> Result<()> {
    if SUPPORTED_OS.contains(&os) {
        return Ok(());
    }
    anyhow::bail!(
        "unsupported operating system '{os}'. codepass runs on Linux or macOS hosts with multipass installed."
    )
}
