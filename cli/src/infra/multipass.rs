//! Infrastructure implementation of the `Hypervisor` port.
//!
//! `MultipassHypervisor<R>` routes all multipass CLI calls through a
//! `CommandRunner`.

use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::application::ports::{CommandRunner, Hypervisor};
use crate::infra::command_runner::TokioCommandRunner;

const MULTIPASS: &str = "multipass";

/// Adapter that shells out to the `multipass` CLI.
///
/// Generic over `R: CommandRunner` so that tests can inject a fake runner
/// without spawning real processes.
pub struct MultipassHypervisor<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> MultipassHypervisor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl MultipassHypervisor<TokioCommandRunner> {
    /// Production adapter. Calls run to completion unless `timeout` is set.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self::new(TokioCommandRunner::with_timeout(timeout))
    }
}

#[async_trait]
impl<R: CommandRunner> Hypervisor for MultipassHypervisor<R> {
    async fn list_instances(&self) -> Result<Output> {
        self.runner
            .run(MULTIPASS, &["info", "--all", "--format", "json"])
            .await
            .context("multipass info --all")
    }

    async fn instance_info(&self, name: &str) -> Result<Output> {
        self.runner
            .run(MULTIPASS, &["info", name, "--format", "json"])
            .await
            .with_context(|| format!("multipass info {name}"))
    }

    async fn purge(&self, name: &str) -> Result<Output> {
        self.runner
            .run(MULTIPASS, &["delete", "--purge", name])
            .await
            .with_context(|| format!("multipass delete --purge {name}"))
    }

    async fn version(&self) -> Result<Output> {
        self.runner
            .run(MULTIPASS, &["version"])
            .await
            .context("multipass version")
    }
}
