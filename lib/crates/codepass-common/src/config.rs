use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default port of the browser IDE inside every workspace VM.
pub const DEFAULT_BACKEND_PORT: u16 = 55123;

/// Gateway service configuration.
///
/// With the `clap` feature every field is also a `codepass service` flag with
/// a `CODEPASS_*` environment fallback.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct ServiceConfig {
    /// Host name or IP address; workspaces are served at `[<port>-]<name>-code.<host>`
    #[cfg_attr(
        feature = "clap",
        arg(long, env = "CODEPASS_HOST", default_value = "0.0.0.0")
    )]
    pub host: String,

    /// Listen port
    #[cfg_attr(feature = "clap", arg(long, env = "CODEPASS_PORT", default_value_t = 443))]
    pub port: u16,

    /// TLS private key path (PEM)
    #[cfg_attr(feature = "clap", arg(long, env = "CODEPASS_KEY"))]
    pub key: Option<PathBuf>,

    /// TLS certificate path (PEM)
    #[cfg_attr(feature = "clap", arg(long, env = "CODEPASS_CRT"))]
    pub crt: Option<PathBuf>,

    /// Directory holding workspace state
    #[cfg_attr(
        feature = "clap",
        arg(long, env = "CODEPASS_DATA_DIR", default_value = ".codepass")
    )]
    pub data_dir: PathBuf,

    /// Port used inside a workspace when the host name carries no port prefix
    #[cfg_attr(
        feature = "clap",
        arg(long, env = "CODEPASS_BACKEND_PORT", default_value_t = DEFAULT_BACKEND_PORT)
    )]
    pub backend_port: u16,

    /// Bearer token required by the control-plane API (open when unset)
    #[cfg_attr(feature = "clap", arg(long, env = "CODEPASS_API_TOKEN", hide_env_values = true))]
    pub api_token: Option<String>,

    /// Seconds between background registry refreshes (0 disables)
    #[cfg_attr(
        feature = "clap",
        arg(long = "refresh-interval", env = "CODEPASS_REFRESH_INTERVAL", default_value_t = 30)
    )]
    pub refresh_interval_secs: u64,

    /// Upper bound in seconds for a provisioning script (unbounded when unset)
    #[cfg_attr(
        feature = "clap",
        arg(long = "provision-timeout", env = "CODEPASS_PROVISION_TIMEOUT")
    )]
    pub provision_timeout_secs: Option<u64>,

    /// Upper bound in seconds for each multipass call (unbounded when unset)
    #[cfg_attr(
        feature = "clap",
        arg(long = "hypervisor-timeout", env = "CODEPASS_HYPERVISOR_TIMEOUT")
    )]
    pub hypervisor_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 443,
            key: None,
            crt: None,
            data_dir: PathBuf::from(".codepass"),
            backend_port: DEFAULT_BACKEND_PORT,
            api_token: None,
            refresh_interval_secs: 30,
            provision_timeout_secs: None,
            hypervisor_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    /// Root directory of the per-workspace directories.
    #[must_use]
    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    /// File recording when the service last started.
    #[must_use]
    pub fn service_marker_path(&self) -> PathBuf {
        self.data_dir.join("service")
    }

    /// Socket address to bind: every interface on `port`. `host` only names
    /// the routing root.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// `true` when both a certificate and a key are configured.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.crt.is_some() && self.key.is_some()
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    #[must_use]
    pub fn provision_timeout(&self) -> Option<Duration> {
        self.provision_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn hypervisor_timeout(&self) -> Option<Duration> {
        self.hypervisor_timeout_secs.map(Duration::from_secs)
    }
}
