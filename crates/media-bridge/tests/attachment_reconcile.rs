//! Reconciliation behavior of the attachment manager.
//!
//! Uses tokio's paused clock so backend latency opens exact race windows:
//! - idempotent attach/detach
//! - single view per entity under overlapping operations
//! - stale in-flight results discarded after rapid off/on/off toggling
//! - deferred teardown vs. remount churn

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use mb_test_utils::{FailFlags, MockBackend};
use media_bridge::attachment::AttachmentManager;
use media_bridge::config::{VideoQuality, DEFAULT_DETACH_DEFER};
use media_bridge::session::{ConnectionState, SessionStatus};
use media_bridge::views::{ViewContainer, ViewKey};
use tokio::sync::watch;

/// Drive spawned tasks to quiescence without advancing time.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn connected_status() -> SessionStatus {
    SessionStatus {
        state: ConnectionState::Connected,
        error: None,
    }
}

fn closed_status() -> SessionStatus {
    SessionStatus {
        state: ConnectionState::Closed,
        error: None,
    }
}

fn setup(
    backend: Arc<MockBackend>,
) -> (
    AttachmentManager,
    ViewContainer,
    watch::Sender<SessionStatus>,
) {
    mb_test_utils::init_test_logging();
    let (status_tx, status_rx) = watch::channel(connected_status());
    let container = ViewContainer::new("video");
    let manager = AttachmentManager::new(
        backend,
        container.clone(),
        status_rx,
        DEFAULT_DETACH_DEFER,
    );
    (manager, container, status_tx)
}

#[tokio::test(start_paused = true)]
async fn test_attach_is_idempotent() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    manager.reconcile(key, true, VideoQuality::Q360).await;

    assert_eq!(backend.calls().attach_video, 1);
    assert_eq!(container.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detach_without_view_is_noop() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, _status) = setup(Arc::clone(&backend));

    manager
        .reconcile(ViewKey::video(1), false, VideoQuality::Q360)
        .await;

    assert_eq!(backend.calls().detach_video, 0);
    assert!(container.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_attaches_produce_single_view() {
    let backend = Arc::new(
        MockBackend::builder()
            .attach_latency(Duration::from_millis(100))
            .build(),
    );
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.reconcile(key, true, VideoQuality::Q360).await }
    });
    tokio::task::yield_now().await;

    // Second request while the first is in flight: dropped, the in-flight
    // attach is authoritative.
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.reconcile(key, true, VideoQuality::Q360).await }
    });

    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(backend.calls().attach_video, 1);
    assert_eq!(container.len(), 1);
    assert!(container.contains(key));
}

#[tokio::test(start_paused = true)]
async fn test_rapid_off_on_off_settles_empty() {
    let backend = Arc::new(
        MockBackend::builder()
            .attach_latency(Duration::from_millis(100))
            .build(),
    );
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    // off: nothing attached, no-op
    manager.reconcile(key, false, VideoQuality::Q360).await;

    // on: attach starts, parks on backend latency
    let attach = tokio::spawn({
        let manager = manager.clone();
        async move { manager.reconcile(key, true, VideoQuality::Q360).await }
    });
    tokio::task::yield_now().await;

    // off again, faster than the backend call: nothing attached yet, so the
    // detach path no-ops, but the desired state is now off.
    manager.reconcile(key, false, VideoQuality::Q360).await;

    attach.await.unwrap();
    settle().await;

    // The resolved attach observed the superseding "off" and discarded its
    // view instead of inserting it.
    assert!(container.is_empty());
    assert_eq!(backend.calls().attach_video, 1);
    assert_eq!(backend.calls().detach_video, 0);
}

#[tokio::test(start_paused = true)]
async fn test_attach_failure_leaves_entity_viewless() {
    let backend = Arc::new(
        MockBackend::builder()
            .fail(FailFlags {
                attach_video: true,
                ..FailFlags::default()
            })
            .build(),
    );
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    assert!(container.is_empty());

    // The next desired-state change retries naturally.
    backend.set_fail(FailFlags::default());
    manager.reconcile(key, true, VideoQuality::Q360).await;
    assert!(container.contains(key));
    assert_eq!(backend.calls().attach_video, 2);
}

#[tokio::test(start_paused = true)]
async fn test_release_then_remount_keeps_view() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    assert!(container.contains(key));

    // Transient teardown/setup churn: release immediately followed by a
    // fresh reconciliation for the same entity.
    manager.release(key);
    manager.reconcile(key, true, VideoQuality::Q360).await;

    // Let the deferred check arm its timer before the clock moves.
    settle().await;
    tokio::time::advance(DEFAULT_DETACH_DEFER + Duration::from_millis(5)).await;
    settle().await;

    assert_eq!(backend.calls().detach_video, 0, "deferred detach must be suppressed");
    assert!(container.contains(key), "view must survive the churn");
}

#[tokio::test(start_paused = true)]
async fn test_sustained_release_detaches() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    manager.release(key);

    settle().await;
    tokio::time::advance(DEFAULT_DETACH_DEFER + Duration::from_millis(5)).await;
    settle().await;

    assert_eq!(backend.calls().detach_video, 1);
    assert!(container.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_release_strips_views_even_when_backend_detach_fails() {
    let backend = Arc::new(
        MockBackend::builder()
            .fail(FailFlags {
                detach_video: true,
                ..FailFlags::default()
            })
            .build(),
    );
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    assert!(container.contains(key));

    manager.release(key);
    settle().await;
    tokio::time::advance(DEFAULT_DETACH_DEFER + Duration::from_millis(5)).await;
    settle().await;

    assert_eq!(backend.calls().detach_video, 1);
    assert!(container.is_empty(), "local cleanup proceeds despite backend failure");
}

#[tokio::test(start_paused = true)]
async fn test_release_during_pending_attach_discards_resolving_view() {
    let backend = Arc::new(
        MockBackend::builder()
            .attach_latency(Duration::from_millis(100))
            .build(),
    );
    let (manager, container, _status) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    // Attach parks on backend latency.
    let attach = tokio::spawn({
        let manager = manager.clone();
        async move { manager.reconcile(key, true, VideoQuality::Q360).await }
    });
    tokio::task::yield_now().await;

    // The entity is torn down while the attach is still in flight. The
    // deferred check fires first and finds nothing to detach; the resolving
    // attach must not re-insert the view afterwards.
    manager.release(key);
    settle().await;

    tokio::time::advance(Duration::from_millis(130)).await;
    attach.await.unwrap();
    settle().await;

    assert!(container.is_empty(), "released entity must not keep a view");
    assert_eq!(backend.calls().attach_video, 1);
    assert_eq!(backend.calls().detach_video, 0);
}

#[tokio::test(start_paused = true)]
async fn test_release_after_session_close_skips_backend() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, status_tx) = setup(Arc::clone(&backend));
    let key = ViewKey::video(1);

    manager.reconcile(key, true, VideoQuality::Q360).await;
    assert!(container.contains(key));

    // Session ends before the deferred check runs: a backend detach would be
    // meaningless, views are stripped locally.
    status_tx.send_replace(closed_status());
    manager.release(key);

    settle().await;
    tokio::time::advance(DEFAULT_DETACH_DEFER + Duration::from_millis(5)).await;
    settle().await;

    assert_eq!(backend.calls().detach_video, 0);
    assert!(container.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_share_views_reconcile_independently_of_video() {
    let backend = Arc::new(MockBackend::builder().build());
    let (manager, container, _status) = setup(Arc::clone(&backend));

    manager
        .reconcile(ViewKey::video(1), true, VideoQuality::Q360)
        .await;
    manager
        .reconcile(ViewKey::share(1), true, VideoQuality::Q360)
        .await;

    assert_eq!(backend.calls().attach_video, 1);
    assert_eq!(backend.calls().attach_share, 1);
    assert_eq!(container.len(), 2);

    manager
        .reconcile(ViewKey::share(1), false, VideoQuality::Q360)
        .await;
    assert_eq!(backend.calls().detach_share, 1);
    assert!(container.contains(ViewKey::video(1)));
    assert!(!container.contains(ViewKey::share(1)));
}
