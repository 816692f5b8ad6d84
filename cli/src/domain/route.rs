//! Host-header routing convention: `[<port>-]<name>-code.<root-host>`.
//!
//! Pure parsing only; registry lookups and forwarding live in the layers above.

use anyhow::{Context, Result};
use regex::Regex;

/// Workspace route extracted from a request host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Workspace name.
    pub name: String,
    /// Raw port prefix, if the host carried one.
    pub port: Option<String>,
}

impl RouteTarget {
    /// Backend authority for a workspace at `address`.
    ///
    /// Returns `None` when the port prefix is not a valid TCP port, which the
    /// router treats like an unknown workspace.
    #[must_use]
    pub fn backend_authority(&self, address: &str, default_port: u16) -> Option<String> {
        let port = match &self.port {
            Some(raw) => raw.parse::<u16>().ok().filter(|p| *p != 0)?,
            None => default_port,
        };
        Some(format!("{address}:{port}"))
    }

    /// Plain-text body of the not-found response.
    #[must_use]
    pub fn not_found_message(&self) -> String {
        match &self.port {
            Some(port) => format!("{}({port}) not found", self.name),
            None => format!("{} not found", self.name),
        }
    }
}

/// Compiled routing pattern for one configured root host.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    regex: Regex,
}

impl RoutePattern {
    /// Build the pattern `^((\d+)-)*([a-zA-Z][a-zA-Z0-9_]*)-code\.<host>$`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root host is empty.
    pub fn new(root_host: &str) -> Result<Self> {
        anyhow::ensure!(!root_host.is_empty(), "root host must not be empty");
        let pattern = format!(
            r"^((\d+)-)*([a-zA-Z][a-zA-Z0-9_]*)-code\.{}$",
            regex::escape(root_host)
        );
        let regex = Regex::new(&pattern)
            .with_context(|| format!("building route pattern for {root_host}"))?;
        Ok(Self { regex })
    }

    /// Classify a `Host` header value. `None` means control-plane traffic.
    ///
    /// A trailing `:port` on the header is ignored.
    #[must_use]
    pub fn match_host(&self, host: &str) -> Option<RouteTarget> {
        let host = strip_port(host);
        let caps = self.regex.captures(host)?;
        let name = caps.get(3)?.as_str().to_string();
        let port = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|p| !p.is_empty());
        Some(RouteTarget { name, port })
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((h, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (h.ends_with(']') || !h.contains(':')) =>
        {
            h
        }
        _ => host,
    }
}
