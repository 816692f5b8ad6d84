//! Service startup checks.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use codepass::commands::service::{check_multipass, check_tls_files, write_service_marker};
use codepass_common::ServiceConfig;

use crate::helpers::FakeHypervisor;

fn config(crt: Option<PathBuf>, key: Option<PathBuf>) -> ServiceConfig {
    ServiceConfig {
        crt,
        key,
        ..ServiceConfig::default()
    }
}

#[test]
fn test_tls_is_optional() {
    assert!(check_tls_files(&config(None, None)).is_ok());
}

#[test]
fn test_tls_files_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let crt = dir.path().join("server.crt");
    let key = dir.path().join("server.key");

    let err = check_tls_files(&config(Some(crt.clone()), Some(key.clone()))).unwrap_err();
    assert!(err.to_string().contains("TLS certificate path is invalid"), "{err}");

    std::fs::write(&crt, "cert").unwrap();
    let err = check_tls_files(&config(Some(crt.clone()), Some(key.clone()))).unwrap_err();
    assert!(err.to_string().contains("TLS private key path is invalid"), "{err}");

    std::fs::write(&key, "key").unwrap();
    assert!(check_tls_files(&config(Some(crt), Some(key))).is_ok());
}

#[test]
fn test_tls_needs_both_halves() {
    let err = check_tls_files(&config(Some("a.crt".into()), None)).unwrap_err();
    assert!(err.to_string().contains("private key"), "{err}");
    let err = check_tls_files(&config(None, Some("a.key".into()))).unwrap_err();
    assert!(err.to_string().contains("certificate"), "{err}");
}

#[tokio::test]
async fn test_multipass_must_be_installed() {
    let hv = FakeHypervisor::new();
    assert!(check_multipass(hv.as_ref()).await.is_ok());

    hv.missing.store(true, Ordering::SeqCst);
    let err = check_multipass(hv.as_ref()).await.unwrap_err();
    assert_eq!(err.to_string(), "multipass is not installed");
}

#[test]
fn test_service_marker_records_start_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("service");
    write_service_marker(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(
        chrono::NaiveDateTime::parse_from_str(&content, "%Y-%m-%d %H:%M:%S").is_ok(),
        "{content}"
    );
}
