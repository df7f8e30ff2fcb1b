//! Local screen-share request/response state machine and the singleton
//! active-share surface for remote sharers.
//!
//! State machine: `Idle → Requesting → Active → Idle` on explicit stop or
//! failure, and `Active → PassivelyStopped → Idle` when the backend
//! unilaterally revokes sharing (a privileged party locked sharing or
//! another party took over). Every transition is broadcast exactly once to
//! registered observers.

use crate::attachment::AttachmentManager;
use crate::backend::{ActiveShareState, MediaBackend, ShareSurface};
use crate::config::VideoQuality;
use crate::errors::BridgeError;
use crate::session::SessionStatus;
use crate::views::ViewKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Buffer size for the share transition broadcast channel.
const SHARE_EVENT_BUFFER: usize = 32;

/// Local share lifecycle states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareState {
    /// Not sharing.
    #[default]
    Idle,
    /// Share start call in flight.
    Requesting,
    /// Sharing; `video_capable` records which surface kind the backend
    /// selected.
    Active { video_capable: bool },
    /// The backend revoked sharing; settles at `Idle` immediately after.
    PassivelyStopped,
}

impl ShareState {
    /// Whether the local user is currently sharing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, ShareState::Active { .. })
    }
}

/// Handle returned by a successful share request; stops sharing when
/// consumed.
pub struct ShareSession {
    controller: ShareController,
}

impl ShareSession {
    /// Stop sharing. Backend failure is logged; the state still resets to
    /// `Idle`.
    pub async fn stop(self) {
        self.controller.stop_share().await;
    }
}

impl fmt::Debug for ShareSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareSession")
            .field("state", &self.controller.state())
            .finish_non_exhaustive()
    }
}

/// Manages the local outbound share flow and the remote active-share
/// surface.
#[derive(Clone)]
pub struct ShareController {
    backend: Arc<dyn MediaBackend>,
    session: watch::Receiver<SessionStatus>,
    state: Arc<Mutex<ShareState>>,
    transitions: broadcast::Sender<ShareState>,
    /// Reconciler for the singleton active-share surface.
    active_views: AttachmentManager,
}

impl ShareController {
    /// Create a controller in the `Idle` state.
    ///
    /// `active_views` must reconcile into the dedicated active-share
    /// container; it is toggled between the current sharer's stream and
    /// hidden.
    #[must_use]
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        session: watch::Receiver<SessionStatus>,
        active_views: AttachmentManager,
    ) -> Self {
        let (transitions, _) = broadcast::channel(SHARE_EVENT_BUFFER);
        Self {
            backend,
            session,
            state: Arc::new(Mutex::new(ShareState::default())),
            transitions,
            active_views,
        }
    }

    /// Current share state.
    #[must_use]
    pub fn state(&self) -> ShareState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observe share transitions. Each transition is delivered exactly once.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShareState> {
        self.transitions.subscribe()
    }

    /// Transition to `next`, broadcasting once. Same-state writes are not
    /// rebroadcast.
    fn set_state(&self, next: ShareState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return;
        }
        *state = next;
        drop(state);
        let _ = self.transitions.send(next);
    }

    /// Request to share the local screen.
    ///
    /// Rejected before any backend call when sharing is locked by policy or
    /// when no session is live. The surface kind is chosen from the
    /// backend's capability query.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Privilege`] when sharing is locked.
    /// - [`BridgeError::Connection`] when not in an active session.
    /// - [`BridgeError::Share`] when the backend start call fails (state
    ///   reverts to `Idle`).
    pub async fn request_share(&self) -> Result<ShareSession, BridgeError> {
        if self.backend.is_share_locked() {
            let err = BridgeError::Privilege("screen sharing is locked".to_string());
            error!(target: "mb.share", error = %err, "share request rejected");
            return Err(err);
        }

        if !self.session.borrow().is_in_session() {
            let err =
                BridgeError::Connection("share requested outside an active session".to_string());
            warn!(target: "mb.share", error = %err, "share request rejected");
            return Err(err);
        }

        let video_capable = self.backend.is_share_surface_video_capable();
        let surface = if video_capable {
            ShareSurface::Video
        } else {
            ShareSurface::Canvas
        };

        self.set_state(ShareState::Requesting);
        match self.backend.start_share_screen(surface).await {
            Ok(()) => {
                self.set_state(ShareState::Active { video_capable });
                info!(target: "mb.share", ?surface, "screen share started");
                Ok(ShareSession {
                    controller: self.clone(),
                })
            }
            Err(e) => {
                self.set_state(ShareState::Idle);
                let err = BridgeError::Share(format!("share start failed: {e}"));
                error!(target: "mb.share", error = %err, "share start failed");
                Err(err)
            }
        }
    }

    /// Stop the local share. Backend failure is logged; state resets to
    /// `Idle` regardless.
    pub async fn stop_share(&self) {
        if let Err(e) = self.backend.stop_share_screen().await {
            let err = BridgeError::Share(format!("share stop failed: {e}"));
            warn!(target: "mb.share", error = %err, "share stop failed, resetting state anyway");
        }
        self.set_state(ShareState::Idle);
    }

    /// Handle a backend-pushed passive stop.
    ///
    /// Runs regardless of the current state: broadcasts `PassivelyStopped`,
    /// hides the active-share surface, then settles at `Idle`. Both
    /// transitions are observable on the broadcast channel.
    pub fn passive_stop(&self) {
        info!(target: "mb.share", "share passively stopped by backend");
        self.set_state(ShareState::PassivelyStopped);
        let hidden = self.active_views.container().clear();
        if hidden > 0 {
            debug!(target: "mb.share", hidden, "active-share surface hidden");
        }
        self.set_state(ShareState::Idle);
    }

    /// Toggle the singleton active-share surface per a backend
    /// `ActiveShareChanged` event.
    ///
    /// `Active` attaches the named sharer's stream, replacing any previous
    /// sharer's view; `Inactive` detaches whatever is shown.
    pub async fn apply_active_share(&self, state: ActiveShareState, entity_id: u64) {
        match state {
            ActiveShareState::Active => {
                let key = ViewKey::share(entity_id);
                // One shared element: detach any previous sharer first.
                for previous in self.active_views.container().keys() {
                    if previous != key {
                        self.active_views
                            .reconcile(previous, false, VideoQuality::default())
                            .await;
                    }
                }
                self.active_views
                    .reconcile(key, true, VideoQuality::default())
                    .await;
            }
            ActiveShareState::Inactive => {
                for key in self.active_views.container().keys() {
                    self.active_views
                        .reconcile(key, false, VideoQuality::default())
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_share_state_is_active() {
        assert!(ShareState::Active {
            video_capable: true
        }
        .is_active());
        assert!(ShareState::Active {
            video_capable: false
        }
        .is_active());
        assert!(!ShareState::Idle.is_active());
        assert!(!ShareState::Requesting.is_active());
        assert!(!ShareState::PassivelyStopped.is_active());
    }
}
