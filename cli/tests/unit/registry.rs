//! Route registry: refresh, lookup and snapshot ordering.

use std::process::Output;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use codepass::application::{Hypervisor, Registry};
use tokio::sync::Notify;

use crate::helpers::{FakeHypervisor, instance_json, ok_output};

#[tokio::test]
async fn test_refresh_maps_names_to_first_ipv4() {
    let hv = FakeHypervisor::new();
    hv.add("dev", &["10.0.0.5", "172.17.0.1"]);
    hv.add("idle", &[]);
    let registry = Registry::new(hv.clone());

    assert!(registry.lookup("dev").is_none());
    assert_eq!(registry.refresh().await.unwrap(), 1);

    assert_eq!(registry.lookup("dev").unwrap().address, "10.0.0.5");
    assert!(registry.lookup("idle").is_none());
    assert!(registry.lookup("ghost").is_none());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_table() {
    let hv = FakeHypervisor::new();
    hv.add("dev", &["10.0.0.5"]);
    let registry = Registry::new(hv.clone());
    registry.refresh().await.unwrap();

    hv.fail_list.store(true, Ordering::SeqCst);
    assert!(registry.refresh().await.is_err());
    assert_eq!(registry.lookup("dev").unwrap().address, "10.0.0.5");
}

#[tokio::test]
async fn test_removed_instance_disappears_after_refresh() {
    let hv = FakeHypervisor::new();
    hv.add("dev", &["10.0.0.5"]);
    let registry = Registry::new(hv.clone());
    registry.refresh().await.unwrap();

    hv.purge("dev").await.unwrap();
    registry.refresh().await.unwrap();
    assert!(registry.lookup("dev").is_none());
    assert!(registry.snapshot().is_empty());
}

/// First call blocks until released and reports the old address; later calls
/// report the new address immediately.
struct GatedHypervisor {
    calls: AtomicUsize,
    entered: Notify,
    release: Notify,
}

fn listing(address: &str) -> Output {
    let doc = serde_json::json!({ "errors": [], "info": { "dev": instance_json(&[address]) } });
    ok_output(&serde_json::to_vec(&doc).unwrap())
}

#[async_trait]
impl Hypervisor for GatedHypervisor {
    async fn list_instances(&self) -> Result<Output> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
            return Ok(listing("10.0.0.1"));
        }
        Ok(listing("10.0.0.2"))
    }
    async fn instance_info(&self, _: &str) -> Result<Output> {
        anyhow::bail!("not used")
    }
    async fn purge(&self, _: &str) -> Result<Output> {
        anyhow::bail!("not used")
    }
    async fn version(&self) -> Result<Output> {
        anyhow::bail!("not used")
    }
}

#[tokio::test]
async fn test_stale_refresh_never_overwrites_newer_table() {
    let hv = Arc::new(GatedHypervisor {
        calls: AtomicUsize::new(0),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let registry = Arc::new(Registry::new(hv.clone()));

    let slow = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.refresh().await }
    });
    hv.entered.notified().await;

    registry.refresh().await.unwrap();
    assert_eq!(registry.lookup("dev").unwrap().address, "10.0.0.2");
    assert_eq!(registry.snapshot().generation(), 2);

    hv.release.notify_one();
    slow.await.unwrap().unwrap();

    assert_eq!(registry.lookup("dev").unwrap().address, "10.0.0.2");
    assert_eq!(registry.snapshot().generation(), 2);
}

/// Alternates between two internally consistent tables.
struct FlippingHypervisor {
    calls: AtomicUsize,
}

#[async_trait]
impl Hypervisor for FlippingHypervisor {
    async fn list_instances(&self) -> Result<Output> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let address = if n % 2 == 0 { "10.0.1.1" } else { "10.0.2.1" };
        let doc = serde_json::json!({ "errors": [], "info": {
            "alpha": instance_json(&[address]),
            "beta": instance_json(&[address]),
        }});
        tokio::task::yield_now().await;
        Ok(ok_output(&serde_json::to_vec(&doc).unwrap()))
    }
    async fn instance_info(&self, _: &str) -> Result<Output> {
        anyhow::bail!("not used")
    }
    async fn purge(&self, _: &str) -> Result<Output> {
        anyhow::bail!("not used")
    }
    async fn version(&self) -> Result<Output> {
        anyhow::bail!("not used")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_always_see_one_complete_snapshot() {
    let registry = Arc::new(Registry::new(Arc::new(FlippingHypervisor {
        calls: AtomicUsize::new(0),
    })));
    registry.refresh().await.unwrap();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..50 {
                    registry.refresh().await.unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            for _ in 0..2_000 {
                let snapshot = registry.snapshot();
                let alpha = snapshot.get("alpha").unwrap();
                let beta = snapshot.get("beta").unwrap();
                assert_eq!(alpha.address, beta.address);
                tokio::task::yield_now().await;
            }
        })
    };

    for w in writers {
        w.await.unwrap();
    }
    reader.await.unwrap();
    assert_eq!(registry.snapshot().len(), 2);
}
