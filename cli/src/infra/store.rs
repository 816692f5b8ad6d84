//! Infrastructure implementation of the `WorkspaceStore` port.
//!
//! One directory per workspace under `<data_dir>/workspaces/<name>/`:
//!
//! | file         | content                                      |
//! |--------------|----------------------------------------------|
//! | `create.sh`  | rendered provisioning script (0755)          |
//! | `create.log` | combined script output                       |
//! | `create`     | creation timestamp and requested resources   |
//! | `pass`       | workspace password (0600)                    |
//! | `state.json` | lifecycle record                             |
//!
//! Blocking filesystem work runs on `tokio::task::spawn_blocking`; files are
//! written atomically via temp file + rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use codepass_common::StateRecord;

use crate::application::ports::{WorkspaceMetadata, WorkspaceStore};
use crate::domain::workspace::{ResourceSpec, render_script, tail_lines, validate_name};

/// Provisioning script template, embedded at compile time.
pub const CREATE_SCRIPT_TEMPLATE: &str = include_str!("../../assets/create.sh");

const SCRIPT_FILE: &str = "create.sh";
const LOG_FILE: &str = "create.log";
const MARKER_FILE: &str = "create";
const PASS_FILE: &str = "pass";
const STATE_FILE: &str = "state.json";

/// Filesystem-backed workspace store rooted at the workspaces directory.
#[derive(Debug, Clone)]
pub struct FsWorkspaceStore {
    root: PathBuf,
}

impl FsWorkspaceStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn reserve_sync(&self, name: &str) -> Result<bool> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating directory {}", self.root.display()))?;
        let dir = self.dir(name);
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("creating directory {}", dir.display())),
        }
    }

    fn write_script_sync(&self, name: &str, spec: &ResourceSpec, password: &str) -> Result<PathBuf> {
        let dir = self.dir(name);
        let script = dir.join(SCRIPT_FILE);
        write_atomic(
            &script,
            render_script(CREATE_SCRIPT_TEMPLATE, name, password, spec).as_bytes(),
            0o755,
        )?;
        let marker = format!(
            "{} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            spec.describe()
        );
        write_atomic(&dir.join(MARKER_FILE), marker.as_bytes(), 0o644)?;
        write_atomic(&dir.join(PASS_FILE), password.as_bytes(), 0o600)?;
        Ok(script)
    }

    fn read_log_sync(&self, name: &str, tail: usize) -> Result<Option<String>> {
        let path = self.dir(name).join(LOG_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(tail_lines(&String::from_utf8_lossy(&bytes), tail))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading log file {}", path.display())),
        }
    }

    fn read_metadata_sync(&self, name: &str) -> WorkspaceMetadata {
        let dir = self.dir(name);
        let read = |file: &str| {
            std::fs::read_to_string(dir.join(file))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        WorkspaceMetadata {
            created: read(MARKER_FILE),
            password: read(PASS_FILE),
        }
    }

    fn write_state_sync(&self, name: &str, record: &StateRecord) -> Result<()> {
        let dir = self.dir(name);
        anyhow::ensure!(dir.is_dir(), "workspace directory {} is gone", dir.display());
        let content = serde_json::to_string_pretty(record).context("serializing state")?;
        write_atomic(&dir.join(STATE_FILE), content.as_bytes(), 0o644)
    }

    fn read_state_sync(&self, name: &str) -> Result<Option<StateRecord>> {
        let path = self.dir(name).join(STATE_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()));
            }
        };
        let record = serde_json::from_str(&content)
            .with_context(|| format!("parsing state file {}", path.display()))?;
        Ok(Some(record))
    }

    fn list_sync(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading directory {}", self.root.display()));
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("reading directory {}", self.root.display()))?;
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && validate_name(name).is_ok()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove_sync(&self, name: &str) -> Result<()> {
        let dir = self.dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing directory {}", dir.display())),
        }
    }

    async fn blocking<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .with_context(|| format!("{what} task panicked"))?
    }
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn exists(&self, name: &str) -> bool {
        tokio::fs::metadata(self.dir(name))
            .await
            .is_ok_and(|m| m.is_dir())
    }

    async fn reserve(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.blocking("reserve", move |s| s.reserve_sync(&name)).await
    }

    async fn write_provisioning_script(
        &self,
        name: &str,
        spec: &ResourceSpec,
        password: &str,
    ) -> Result<PathBuf> {
        let (name, spec, password) = (name.to_string(), spec.clone(), password.to_string());
        self.blocking("script write", move |s| {
            s.write_script_sync(&name, &spec, &password)
        })
        .await
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.dir(name).join(LOG_FILE)
    }

    async fn read_creation_log(&self, name: &str, tail: usize) -> Result<Option<String>> {
        let name = name.to_string();
        self.blocking("log read", move |s| s.read_log_sync(&name, tail))
            .await
    }

    async fn read_metadata(&self, name: &str) -> WorkspaceMetadata {
        let name = name.to_string();
        self.blocking("metadata read", move |s| Ok(s.read_metadata_sync(&name)))
            .await
            .unwrap_or_default()
    }

    async fn write_state(&self, name: &str, record: &StateRecord) -> Result<()> {
        let (name, record) = (name.to_string(), record.clone());
        self.blocking("state save", move |s| s.write_state_sync(&name, &record))
            .await
    }

    async fn read_state(&self, name: &str) -> Result<Option<StateRecord>> {
        let name = name.to_string();
        self.blocking("state load", move |s| s.read_state_sync(&name))
            .await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.blocking("list", |s| s.list_sync()).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.blocking("remove", move |s| s.remove_sync(&name)).await
    }
}

/// Write via temp file + rename so readers never see a partial file.
fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    std::fs::write(&temp, content)
        .with_context(|| format!("writing temp file {}", temp.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting permissions on {}", temp.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    std::fs::rename(&temp, path).with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}
