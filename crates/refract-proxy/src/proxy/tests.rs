//! Instance lifecycle tests. Traffic-level behavior is covered by the
//! end-to-end suite under `tests/`.

use super::server::Proxy;
use crate::config::ProxyConfig;
use crate::events::EventKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn base_config(fixtures: &std::path::Path) -> ProxyConfig {
    ProxyConfig {
        port: 0,
        host: "127.0.0.1".to_string(),
        fixtures_path: fixtures.to_path_buf(),
        ..ProxyConfig::default()
    }
}

#[tokio::test]
async fn test_record_mode_creates_store_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(&tmp.path().join("fixtures"));
    config.record = true;

    let _proxy = Proxy::new(config, Vec::new()).await.unwrap();
    assert!(tmp.path().join("fixtures/meta").is_dir());
    assert!(tmp.path().join("fixtures/data").is_dir());
}

#[tokio::test]
async fn test_plain_mode_touches_no_store() {
    let tmp = tempfile::tempdir().unwrap();
    let config = base_config(&tmp.path().join("fixtures"));

    let proxy = Proxy::new(config, Vec::new()).await.unwrap();
    assert!(proxy.store.is_none());
    assert!(!tmp.path().join("fixtures").exists());
}

#[tokio::test]
async fn test_mitm_without_tls_material_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.mitm = true;

    assert!(Proxy::new(config, Vec::new()).await.is_err());
}

#[tokio::test]
async fn test_listen_binds_ephemeral_port_and_accepts() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = Arc::new(
        Proxy::new(base_config(tmp.path()), Vec::new())
            .await
            .unwrap(),
    );

    let heard = Arc::new(AtomicBool::new(false));
    let heard_in_subscriber = Arc::clone(&heard);
    proxy.notifier.subscribe(EventKind::Listening, move |_| {
        heard_in_subscriber.store(true, Ordering::SeqCst);
    });

    let addr = Arc::clone(&proxy).listen().await.unwrap();
    assert_ne!(addr.port(), 0);
    assert!(heard.load(Ordering::SeqCst));

    // The listener is live.
    tokio::net::TcpStream::connect(addr).await.unwrap();

    proxy.close();
}

#[tokio::test]
async fn test_close_publishes_event() {
    let tmp = tempfile::tempdir().unwrap();
    let proxy = Arc::new(
        Proxy::new(base_config(tmp.path()), Vec::new())
            .await
            .unwrap(),
    );

    let closed = Arc::new(AtomicBool::new(false));
    let closed_in_subscriber = Arc::clone(&closed);
    proxy.notifier.subscribe(EventKind::Close, move |_| {
        closed_in_subscriber.store(true, Ordering::SeqCst);
    });

    Arc::clone(&proxy).listen().await.unwrap();
    proxy.close();
    assert!(closed.load(Ordering::SeqCst));
}
