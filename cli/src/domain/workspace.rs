//! Workspace domain types and pure validation functions.
//!
//! This module is intentionally free of I/O, async, and external layer imports.
//! All functions take data in and return data out.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use crate::domain::error::WorkspaceError;

/// Log lines returned when the caller does not ask for a specific amount.
pub const DEFAULT_TAIL: usize = 200;

/// Upper bound on log lines returned in one response.
pub const MAX_TAIL: usize = 10_000;

/// Length of a generated workspace password.
pub const GENERATED_PASSWORD_LEN: usize = 16;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("valid regex")
});

static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-zA-Z0-9_]*$").expect("valid regex")
});

/// Resource values end up inside a shell script.
static RESOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-zA-Z0-9.]*$").expect("valid regex")
});

/// Resources requested for a workspace VM, passed through to multipass.
///
/// Empty values let the provisioning script pick its defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    pub cpus: String,
    pub disk: String,
    pub memory: String,
}

impl ResourceSpec {
    /// Reject values that could break out of the provisioning script.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidResource`] for the first offending field.
    pub fn validate(&self) -> Result<(), WorkspaceError> {
        for (field, value) in [
            ("cpus", &self.cpus),
            ("disk", &self.disk),
            ("memory", &self.memory),
        ] {
            if !RESOURCE_RE.is_match(value) {
                return Err(WorkspaceError::InvalidResource {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// One-line description stored in the creation marker.
    #[must_use]
    pub fn describe(&self) -> String {
        let or_default = |v: &str| {
            if v.is_empty() {
                "default".to_string()
            } else {
                v.to_string()
            }
        };
        format!(
            "cpus={} disk={} memory={}",
            or_default(&self.cpus),
            or_default(&self.disk),
            or_default(&self.memory)
        )
    }
}

/// Validates a workspace name: a letter followed by letters, digits or underscores.
///
/// The name becomes the multipass instance name and the left-most label of
/// `<name>-code.<host>`, so `-` and `.` are never allowed.
///
/// # Errors
///
/// Returns an error if the name is empty or malformed.
pub fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    if name.is_empty() {
        return Err(WorkspaceError::EmptyName);
    }
    if !NAME_RE.is_match(name) {
        return Err(WorkspaceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validates a workspace password (letters, digits, underscores; may be empty).
///
/// # Errors
///
/// Returns an error if the password contains any other character.
pub fn validate_password(password: &str) -> Result<(), WorkspaceError> {
    if PASSWORD_RE.is_match(password) {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidPassword)
    }
}

/// Generate a random password from the permitted alphabet.
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// Use the supplied password, or generate one when it is empty.
///
/// # Errors
///
/// Returns an error if a supplied password contains forbidden characters.
pub fn resolve_password(password: Option<&str>) -> Result<String, WorkspaceError> {
    let password = match password {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => generate_password(),
    };
    validate_password(&password)?;
    Ok(password)
}

/// Clamp a requested log tail: absent or non-positive means [`DEFAULT_TAIL`],
/// anything above [`MAX_TAIL`] is capped.
#[must_use]
pub fn clamp_tail(tail: Option<i64>) -> usize {
    match tail {
        Some(n) if n > 0 => usize::try_from(n).map_or(MAX_TAIL, |n| n.min(MAX_TAIL)),
        _ => DEFAULT_TAIL,
    }
}

/// Keep the last `lines` lines of `content`.
#[must_use]
pub fn tail_lines(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Substitute workspace parameters into the provisioning script template.
///
/// Placeholders are `{{NAME}}`, `{{PASS}}`, `{{CPUS}}`, `{{DISK}}` and `{{MEMORY}}`.
/// Callers must have validated every value first.
#[must_use]
pub fn render_script(template: &str, name: &str, password: &str, spec: &ResourceSpec) -> String {
    template
        .replace("{{NAME}}", name)
        .replace("{{PASS}}", password)
        .replace("{{CPUS}}", &spec.cpus)
        .replace("{{DISK}}", &spec.disk)
        .replace("{{MEMORY}}", &spec.memory)
}
