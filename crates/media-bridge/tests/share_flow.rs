//! Local share request/response flow, passive revocation, and the singleton
//! active-share surface.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use mb_test_utils::{FailFlags, MockBackend};
use media_bridge::attachment::AttachmentManager;
use media_bridge::backend::{ActiveShareState, ShareSurface};
use media_bridge::config::DEFAULT_DETACH_DEFER;
use media_bridge::errors::BridgeError;
use media_bridge::session::{ConnectionState, SessionStatus};
use media_bridge::share::{ShareController, ShareState};
use media_bridge::views::{ViewContainer, ViewKey};
use tokio::sync::watch;

fn setup(
    backend: Arc<MockBackend>,
    connected: bool,
) -> (ShareController, ViewContainer, watch::Sender<SessionStatus>) {
    mb_test_utils::init_test_logging();
    let state = if connected {
        ConnectionState::Connected
    } else {
        ConnectionState::Idle
    };
    let (status_tx, status_rx) = watch::channel(SessionStatus { state, error: None });

    let container = ViewContainer::new("active-share");
    let active_views = AttachmentManager::new(
        backend.clone(),
        container.clone(),
        status_rx.clone(),
        DEFAULT_DETACH_DEFER,
    );
    let controller = ShareController::new(backend, status_rx, active_views);
    (controller, container, status_tx)
}

#[tokio::test]
async fn test_share_while_locked_is_rejected_before_backend_call() {
    let backend = Arc::new(MockBackend::builder().share_locked().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let err = share
        .request_share()
        .await
        .expect_err("locked share must be rejected");

    assert!(matches!(err, BridgeError::Privilege(_)));
    assert_eq!(backend.calls().share_start, 0);
    assert_eq!(share.state(), ShareState::Idle);
}

#[tokio::test]
async fn test_share_outside_session_is_rejected() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), false);

    let err = share
        .request_share()
        .await
        .expect_err("share outside a session must be rejected");

    assert!(matches!(err, BridgeError::Connection(_)));
    assert_eq!(backend.calls().share_start, 0);
}

#[tokio::test]
async fn test_share_uses_video_surface_when_capable() {
    let backend = Arc::new(MockBackend::builder().video_capable_surface().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let session = share.request_share().await.unwrap();

    assert_eq!(
        share.state(),
        ShareState::Active {
            video_capable: true
        }
    );
    assert_eq!(backend.last_share_surface(), Some(ShareSurface::Video));

    session.stop().await;
    assert_eq!(share.state(), ShareState::Idle);
    assert_eq!(backend.calls().share_stop, 1);
}

#[tokio::test]
async fn test_share_falls_back_to_canvas_surface() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let _session = share.request_share().await.unwrap();

    assert_eq!(
        share.state(),
        ShareState::Active {
            video_capable: false
        }
    );
    assert_eq!(backend.last_share_surface(), Some(ShareSurface::Canvas));
}

#[tokio::test]
async fn test_share_start_failure_reverts_to_idle() {
    let backend = Arc::new(
        MockBackend::builder()
            .fail(FailFlags {
                share_start: true,
                ..FailFlags::default()
            })
            .build(),
    );
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let err = share.request_share().await.expect_err("start must fail");

    assert!(matches!(err, BridgeError::Share(_)));
    assert_eq!(share.state(), ShareState::Idle);
    assert_eq!(backend.calls().share_start, 1);
}

#[tokio::test]
async fn test_stop_failure_still_resets_state() {
    let backend = Arc::new(
        MockBackend::builder()
            .fail(FailFlags {
                share_stop: true,
                ..FailFlags::default()
            })
            .build(),
    );
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let session = share.request_share().await.unwrap();
    session.stop().await;

    assert_eq!(share.state(), ShareState::Idle);
}

#[tokio::test]
async fn test_transitions_are_broadcast_exactly_once_each() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let mut transitions = share.subscribe();
    let _session = share.request_share().await.unwrap();

    assert_eq!(transitions.recv().await.unwrap(), ShareState::Requesting);
    assert_eq!(
        transitions.recv().await.unwrap(),
        ShareState::Active {
            video_capable: false
        }
    );
}

#[tokio::test]
async fn test_passive_stop_traverses_passively_stopped_then_idle() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    let _session = share.request_share().await.unwrap();
    let mut transitions = share.subscribe();

    share.passive_stop();

    assert_eq!(
        transitions.recv().await.unwrap(),
        ShareState::PassivelyStopped
    );
    assert_eq!(transitions.recv().await.unwrap(), ShareState::Idle);
    assert_eq!(share.state(), ShareState::Idle);
}

#[tokio::test]
async fn test_passive_stop_applies_regardless_of_current_state() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, _container, _status) = setup(Arc::clone(&backend), true);

    // Never requested a share; handler must still settle at Idle without
    // touching the backend.
    share.passive_stop();

    assert_eq!(share.state(), ShareState::Idle);
    assert_eq!(backend.calls().share_stop, 0);
}

#[tokio::test]
async fn test_active_share_surface_toggles_single_view() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, container, _status) = setup(Arc::clone(&backend), true);

    share.apply_active_share(ActiveShareState::Active, 7).await;
    assert!(container.contains(ViewKey::share(7)));
    assert_eq!(container.len(), 1);

    // A new sharer replaces the previous one; still a single element.
    share.apply_active_share(ActiveShareState::Active, 9).await;
    assert!(container.contains(ViewKey::share(9)));
    assert!(!container.contains(ViewKey::share(7)));
    assert_eq!(container.len(), 1);
    assert_eq!(backend.calls().detach_share, 1);

    share.apply_active_share(ActiveShareState::Inactive, 9).await;
    assert!(container.is_empty());
    assert_eq!(backend.calls().detach_share, 2);
}

#[tokio::test]
async fn test_passive_stop_hides_active_share_surface() {
    let backend = Arc::new(MockBackend::builder().build());
    let (share, container, _status) = setup(Arc::clone(&backend), true);

    share.apply_active_share(ActiveShareState::Active, 7).await;
    assert!(!container.is_empty());

    share.passive_stop();
    assert!(container.is_empty());
}
