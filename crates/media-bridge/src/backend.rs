//! Media backend capability trait and event types.
//!
//! The backend is an explicit, injectable handle passed into every component
//! rather than fetched from ambient/global scope. Production embeds an
//! adapter over the real media engine; tests substitute
//! `mb_test_utils::MockBackend`.
//!
//! Event ordering contract: events delivered through the [`subscribe`]
//! channel arrive strictly in the order the backend emitted them. The bridge
//! never reorders them; a single pump task consumes the stream.
//!
//! [`subscribe`]: MediaBackend::subscribe

use crate::config::{InitOptions, SessionConfig, VideoQuality};
use crate::roster::Participant;
use crate::views::MediaView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque backend-side failure.
///
/// Callers wrap it into the appropriate [`crate::errors::BridgeError`]
/// variant at the operation boundary.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    /// Construct from anything displayable.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Basic facts about the current backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Whether the local user is currently in a meeting.
    pub in_meeting: bool,
    /// Entity id of the local user.
    pub local_user_id: u64,
}

/// Rendering surface kind for outbound screen sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareSurface {
    /// Video-capable surface.
    Video,
    /// Canvas-only surface.
    Canvas,
}

/// Connection-level transitions reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Session established.
    Connected,
    /// Session dropped, backend is attempting to recover.
    Reconnecting,
    /// Session ended (the normal end-of-session path, not a failure).
    Closed,
    /// Session failed irrecoverably.
    Failed {
        /// Backend-reported reason.
        reason: String,
    },
}

/// Whether a remote share is currently being presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveShareState {
    /// The named entity is actively sharing.
    Active,
    /// No one is sharing.
    Inactive,
}

/// Tagged union of every backend event kind consumed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendEvent {
    /// Connection-level state change.
    ConnectionChanged(ConnectionEvent),
    /// Participants joined the roster.
    RosterAdded { entity_ids: Vec<u64> },
    /// Participants left the roster.
    RosterRemoved { entity_ids: Vec<u64> },
    /// Participant properties changed.
    RosterUpdated { entity_ids: Vec<u64> },
    /// A participant started or stopped capturing video.
    VideoCaptureChanged { entity_id: u64, on: bool },
    /// A participant's audio state changed.
    AudioStateChanged { entity_id: u64, on: bool },
    /// A remote participant started or stopped sharing.
    ShareStateChanged { entity_id: u64, on: bool },
    /// The currently presented sharer changed.
    ActiveShareChanged {
        state: ActiveShareState,
        entity_id: u64,
    },
    /// The backend unilaterally revoked the local user's share.
    PassiveShareStopped,
}

/// Capability set the bridge requires from the media backend.
///
/// All methods take `&self`; implementations are expected to serialize at
/// the connection level internally. The bridge layers its own per-entity
/// in-flight guards on top (see [`crate::attachment::AttachmentManager`]).
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Initialize the backend engine.
    async fn init(&self, options: &InitOptions) -> Result<(), BackendError>;

    /// Join the session described by `config`.
    async fn join(&self, config: &SessionConfig) -> Result<(), BackendError>;

    /// Leave the session. `end_for_everyone` ends it for all participants
    /// (host privilege).
    async fn leave(&self, end_for_everyone: bool) -> Result<(), BackendError>;

    /// Whether the local user holds host privileges.
    fn is_host(&self) -> bool;

    /// Current session facts.
    fn session_info(&self) -> SessionInfo;

    /// Current roster snapshot, in backend-defined order.
    fn all_participants(&self) -> Vec<Participant>;

    /// Attach a video view for `entity_id` at the requested quality.
    async fn attach_video(
        &self,
        entity_id: u64,
        quality: VideoQuality,
    ) -> Result<MediaView, BackendError>;

    /// Detach the video view for `entity_id`.
    async fn detach_video(&self, entity_id: u64) -> Result<(), BackendError>;

    /// Attach a share view for `entity_id`.
    async fn attach_share_view(&self, entity_id: u64) -> Result<MediaView, BackendError>;

    /// Detach the share view for `entity_id`.
    async fn detach_share_view(&self, entity_id: u64) -> Result<(), BackendError>;

    /// Start sharing the local screen on the given surface.
    async fn start_share_screen(&self, surface: ShareSurface) -> Result<(), BackendError>;

    /// Stop sharing the local screen.
    async fn stop_share_screen(&self) -> Result<(), BackendError>;

    /// Whether sharing is currently locked by policy.
    fn is_share_locked(&self) -> bool;

    /// Whether the share surface supports video-capable rendering.
    fn is_share_surface_video_capable(&self) -> bool;

    /// Start local audio.
    async fn start_audio(&self) -> Result<(), BackendError>;

    /// Stop local audio.
    async fn stop_audio(&self) -> Result<(), BackendError>;

    /// Mute local audio.
    async fn mute_audio(&self) -> Result<(), BackendError>;

    /// Unmute local audio.
    async fn unmute_audio(&self) -> Result<(), BackendError>;

    /// Start local video.
    async fn start_video(&self) -> Result<(), BackendError>;

    /// Stop local video.
    async fn stop_video(&self) -> Result<(), BackendError>;

    /// Subscribe to the ordered backend event stream.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::Receiver<BackendEvent>;
}
