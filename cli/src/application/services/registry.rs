//! Name → address registry consumed by the subdomain router.
//!
//! The table is rebuilt from hypervisor state and swapped in whole. Readers
//! always see one complete snapshot; an older refresh finishing late never
//! replaces a newer table.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use codepass_common::MultipassInfo;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Hypervisor;

/// A routable workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub name: String,
    /// First IPv4 address reported for the instance.
    pub address: String,
}

/// Immutable routing snapshot.
#[derive(Debug, Default)]
pub struct RouteTable {
    generation: u64,
    entries: HashMap<String, ProxyEntry>,
}

impl RouteTable {
    fn new(generation: u64, entries: Vec<ProxyEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();
        Self {
            generation,
            entries,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProxyEntry> {
        self.entries.get(name)
    }

    /// Refresh ticket that produced this table; `0` for the initial empty table.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name.
    #[must_use]
    pub fn entries(&self) -> Vec<&ProxyEntry> {
        let mut all: Vec<&ProxyEntry> = self.entries.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Process-wide routing registry.
pub struct Registry {
    hypervisor: Arc<dyn Hypervisor>,
    table: ArcSwap<RouteTable>,
    tickets: AtomicU64,
}

impl Registry {
    /// Create an empty registry. Call [`Registry::refresh`] to populate it.
    #[must_use]
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self {
            hypervisor,
            table: ArcSwap::from_pointee(RouteTable::default()),
            tickets: AtomicU64::new(0),
        }
    }

    /// Rebuild the table from the hypervisor and publish it.
    ///
    /// Returns the number of routable workspaces in the new table.
    ///
    /// # Errors
    ///
    /// Returns an error if the hypervisor call fails or its output cannot be
    /// parsed. The previous table stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;

        let output = self
            .hypervisor
            .list_instances()
            .await
            .context("listing instances")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("multipass info failed: {}", stderr.trim());
        }
        let entries = parse_instances(&output.stdout)?;
        let count = entries.len();

        let fresh = Arc::new(RouteTable::new(ticket, entries));
        let previous = self.table.rcu(|current| {
            if current.generation > ticket {
                Arc::clone(current)
            } else {
                Arc::clone(&fresh)
            }
        });
        if previous.generation > ticket {
            tracing::debug!(ticket, current = previous.generation, "stale refresh discarded");
        } else {
            tracing::debug!(ticket, routes = count, "route table refreshed");
        }
        Ok(count)
    }

    /// Address entry for `name` in the current snapshot.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ProxyEntry> {
        self.table.load().get(name).cloned()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Refresh on a fixed interval until `shutdown` fires.
    pub async fn run_periodic(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already refreshed.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(error = %format!("{e:#}"), "periodic route refresh failed");
                    }
                }
            }
        }
        tracing::debug!("route refresher stopped");
    }
}

/// Extract routable entries from `multipass info --all --format json` output.
///
/// Instances without an IPv4 address are omitted.
///
/// # Errors
///
/// Returns an error if the document is not valid multipass JSON.
pub fn parse_instances(stdout: &[u8]) -> Result<Vec<ProxyEntry>> {
    let doc: MultipassInfo =
        serde_json::from_slice(stdout).context("parsing multipass info")?;
    Ok(doc
        .info
        .into_iter()
        .filter_map(|(name, instance)| {
            let address = instance.primary_ipv4()?.to_string();
            Some(ProxyEntry { name, address })
        })
        .collect())
}
