//! Media Bridge
//!
//! Bridges a declarative list of remote participants and shared screens to
//! an imperative media backend that attaches and detaches rendering views.
//! The hard part is not the glue but the lifecycle and concurrency control
//! that keeps "one view per live entity, no duplicates, no leaks" true
//! under racing attach/detach calls, embedder re-render churn, rapid on/off
//! toggling and out-of-order-looking backend event streams.
//!
//! # Architecture
//!
//! ```text
//! MediaBridge (facade)
//! ├── SessionController      owns init/join/leave, publishes SessionStatus
//! ├── ParticipantRegistry    wholesale roster snapshots from backend events
//! ├── AttachmentManager ×2   per-entity reconciliation (video, share)
//! ├── ShareController        local share state machine + active-share surface
//! ├── ContainerRegistry      mount points for attached views
//! └── EventPump              one task, dispatches backend events in order
//! ```
//!
//! # Key design decisions
//!
//! - **Injectable backend**: the backend is an explicit [`backend::MediaBackend`]
//!   handle passed into every component, never fetched ambiently.
//! - **Drop, don't queue**: a reconciliation arriving while an operation is
//!   in flight for the same entity is dropped; the next state change
//!   reissues the correct final request.
//! - **Post-hoc staleness**: in-flight backend calls are never cancelled;
//!   stale results are discarded by re-checking the container and the
//!   entity's last desired state after the call resolves.
//! - **Deferred teardown**: releases are committed one deferral window
//!   later, so transient teardown/setup churn never round-trips the backend.
//!
//! # Modules
//!
//! - [`backend`] - backend capability trait and event types
//! - [`bridge`] - facade and event pump
//! - [`session`] - connection state machine
//! - [`attachment`] - per-entity attach/detach reconciliation
//! - [`share`] - local share flow and active-share surface
//! - [`roster`] - participant snapshots
//! - [`views`] - containers and attached-view bookkeeping
//! - [`config`] - session/bridge configuration
//! - [`errors`] - error taxonomy and containment policy

pub mod attachment;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod roster;
pub mod session;
pub mod share;
pub mod views;

pub use attachment::AttachmentManager;
pub use backend::{
    ActiveShareState, BackendError, BackendEvent, ConnectionEvent, MediaBackend, SessionInfo,
    ShareSurface,
};
pub use bridge::{MediaBridge, ACTIVE_SHARE_CONTAINER, SHARE_CONTAINER, VIDEO_CONTAINER};
pub use config::{BridgeOptions, InitOptions, MediaOptions, SessionConfig, VideoQuality};
pub use errors::{BridgeError, Result};
pub use roster::{Participant, ParticipantRegistry};
pub use session::{ConnectionState, SessionController, SessionStatus};
pub use share::{ShareController, ShareSession, ShareState};
pub use views::{ContainerRegistry, MediaView, ViewContainer, ViewKey, ViewKind};
