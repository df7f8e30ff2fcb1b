//! Session connection state machine.
//!
//! Owns when the backend is initialized, joined, and left, and derives the
//! `{is_loading, is_in_session, is_error}` booleans consumers read.
//!
//! Failure containment: only configuration errors propagate to the caller as
//! `Err`. Init/join failures are captured into the published status and the
//! caller retries by re-invoking [`SessionController::activate`]. Leave
//! failures during deactivation are logged and swallowed; deactivation
//! always completes.

use crate::backend::{ConnectionEvent, MediaBackend};
use crate::config::{InitOptions, MediaOptions, SessionConfig};
use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Connection lifecycle states. Exactly one value at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No join attempted (or waiting on `wait_before_joining`).
    #[default]
    Idle,
    /// Backend engine initializing.
    Initializing,
    /// Join call in flight.
    Joining,
    /// In session.
    Connected,
    /// Backend lost the session and is recovering it.
    Reconnecting,
    /// Session ended normally.
    Closed,
    /// Init or join failed; explicit re-activation required.
    Failed,
}

/// Published session status with derived consumer booleans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Captured failure, if any.
    pub error: Option<String>,
}

impl SessionStatus {
    fn new(state: ConnectionState, error: Option<String>) -> Self {
        Self { state, error }
    }

    /// A connection attempt or recovery is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Initializing | ConnectionState::Joining | ConnectionState::Reconnecting
        )
    }

    /// The session is live.
    #[must_use]
    pub fn is_in_session(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A failure has been captured and not yet cleared.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Mutable controller state behind one lock.
#[derive(Debug, Default)]
struct ControllerState {
    /// Options recorded at activation, read back at deactivation.
    media_options: MediaOptions,
    /// Config of the join attempt currently live, for deep-equality rejoin
    /// suppression.
    joined_config: Option<SessionConfig>,
}

/// Owns the connect/join/leave lifecycle against the backend.
pub struct SessionController {
    backend: Arc<dyn MediaBackend>,
    init_options: InitOptions,
    status_tx: watch::Sender<SessionStatus>,
    state: Mutex<ControllerState>,
}

impl SessionController {
    /// Create a controller in the `Idle` state.
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>, init_options: InitOptions) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            backend,
            init_options,
            status_tx,
            state: Mutex::new(ControllerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    /// Observe status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self, state: ConnectionState, error: Option<String>) {
        self.status_tx.send_replace(SessionStatus::new(state, error));
    }

    /// Validate `config`, initialize the backend and join the session.
    ///
    /// - `wait_before_joining` set: the call records the options and returns
    ///   without touching the backend; call again with the flag cleared to
    ///   actually join.
    /// - Audio/video are started after a successful join per the disable
    ///   flags, concurrently and best-effort: either may fail independently
    ///   without failing activation.
    /// - A config deep-equal to the one already joined is a no-op while the
    ///   session is live.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] synchronously, before any
    /// backend call, when `topic`, `auth_token` or `user_name` is missing.
    /// Init/join failures do NOT return `Err`; they are captured into the
    /// published status (`Failed` + error) and require explicit
    /// re-activation.
    pub async fn activate(
        &self,
        config: SessionConfig,
        options: MediaOptions,
    ) -> Result<(), BridgeError> {
        config.validate()?;

        self.lock().media_options = options;

        if options.wait_before_joining {
            debug!(
                target: "mb.session",
                topic = %config.topic,
                "activation deferred by wait_before_joining"
            );
            return Ok(());
        }

        if self.status().is_in_session() && self.lock().joined_config.as_ref() == Some(&config) {
            debug!(
                target: "mb.session",
                topic = %config.topic,
                "already joined with an equal config, skipping rejoin"
            );
            return Ok(());
        }

        self.publish(ConnectionState::Initializing, None);
        if let Err(e) = self.backend.init(&self.init_options).await {
            let err = BridgeError::Connection(format!("backend init failed: {e}"));
            error!(target: "mb.session", error = %err, "initialization failed");
            self.publish(ConnectionState::Failed, Some(err.to_string()));
            return Ok(());
        }

        self.publish(ConnectionState::Joining, None);
        if let Err(e) = self.backend.join(&config).await {
            let err = BridgeError::Connection(format!("join failed: {e}"));
            error!(
                target: "mb.session",
                topic = %config.topic,
                error = %err,
                "join failed"
            );
            self.publish(ConnectionState::Failed, Some(err.to_string()));
            return Ok(());
        }

        self.lock().joined_config = Some(config.clone());
        self.start_media(options).await;
        self.publish(ConnectionState::Connected, None);
        info!(target: "mb.session", topic = %config.topic, "session joined");
        Ok(())
    }

    /// Start audio/video per the disable flags, tolerating independent
    /// failures.
    async fn start_media(&self, options: MediaOptions) {
        match (options.disable_audio, options.disable_video) {
            (false, false) => {
                let (audio, video) =
                    tokio::join!(self.backend.start_audio(), self.backend.start_video());
                if let Err(e) = audio {
                    warn!(target: "mb.session", error = %e, "start_audio failed, continuing");
                }
                if let Err(e) = video {
                    warn!(target: "mb.session", error = %e, "start_video failed, continuing");
                }
            }
            (false, true) => {
                if let Err(e) = self.backend.start_audio().await {
                    warn!(target: "mb.session", error = %e, "start_audio failed, continuing");
                }
            }
            (true, false) => {
                if let Err(e) = self.backend.start_video().await {
                    warn!(target: "mb.session", error = %e, "start_video failed, continuing");
                }
            }
            (true, true) => {}
        }
    }

    /// Leave the session if joined.
    ///
    /// Hosts that requested `end_on_leave` end the session for everyone;
    /// non-hosts requesting it are warned and leave individually. Leave
    /// errors are logged and swallowed; this method never fails.
    pub async fn deactivate(&self) {
        let options = self.lock().media_options;
        let joined = self.status().is_in_session() || self.backend.session_info().in_meeting;

        if joined {
            let end_for_everyone = if options.end_on_leave {
                if self.backend.is_host() {
                    true
                } else {
                    warn!(
                        target: "mb.session",
                        "end_on_leave requested by non-host, leaving individually"
                    );
                    false
                }
            } else {
                false
            };

            if let Err(e) = self.backend.leave(end_for_everyone).await {
                let err = BridgeError::Leave(e.to_string());
                warn!(target: "mb.session", error = %err, "leave failed during deactivation");
            }
        }

        self.lock().joined_config = None;
        self.publish(ConnectionState::Closed, None);
        info!(target: "mb.session", "session deactivated");
    }

    /// Apply a backend-reported connection transition.
    pub fn apply_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                debug!(target: "mb.session", "backend reported connected");
                self.publish(ConnectionState::Connected, None);
            }
            ConnectionEvent::Closed => {
                // The normal session-ended path, not a failure.
                debug!(target: "mb.session", "backend reported closed");
                self.lock().joined_config = None;
                self.publish(ConnectionState::Closed, None);
            }
            ConnectionEvent::Reconnecting => {
                debug!(target: "mb.session", "backend reported reconnecting");
                self.publish(ConnectionState::Reconnecting, None);
            }
            ConnectionEvent::Failed { reason } => {
                error!(target: "mb.session", reason = %reason, "backend reported failure");
                self.publish(ConnectionState::Failed, Some(reason));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        let idle = SessionStatus::new(ConnectionState::Idle, None);
        assert!(!idle.is_loading());
        assert!(!idle.is_in_session());
        assert!(!idle.is_error());

        for state in [
            ConnectionState::Initializing,
            ConnectionState::Joining,
            ConnectionState::Reconnecting,
        ] {
            let status = SessionStatus::new(state, None);
            assert!(status.is_loading(), "{state:?} must derive is_loading");
            assert!(!status.is_in_session());
        }

        let connected = SessionStatus::new(ConnectionState::Connected, None);
        assert!(connected.is_in_session());
        assert!(!connected.is_loading());

        let failed = SessionStatus::new(ConnectionState::Failed, Some("join failed".to_string()));
        assert!(failed.is_error());
        assert!(!failed.is_in_session());
        assert!(!failed.is_loading());
    }

    #[test]
    fn test_closed_is_not_an_error() {
        let closed = SessionStatus::new(ConnectionState::Closed, None);
        assert!(!closed.is_error());
        assert!(!closed.is_in_session());
        assert!(!closed.is_loading());
    }
}
