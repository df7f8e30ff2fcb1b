//! Participant roster registry.
//!
//! The roster is a snapshot replaced wholesale on every registry-changed
//! event, never incrementally patched. Insertion order is backend-defined
//! and carries no meaning.

use crate::backend::MediaBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// One remote participant (or the local user) as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Backend-assigned entity id.
    pub id: u64,
    /// Display name.
    pub display_name: String,
    /// Whether the participant is capturing video.
    pub video_on: bool,
    /// Whether the participant is sharing their screen.
    pub share_on: bool,
    /// Whether the participant's audio is live.
    pub audio_on: bool,
}

impl Participant {
    /// Create a participant with all media off.
    #[must_use]
    pub fn new(id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            video_on: false,
            share_on: false,
            audio_on: false,
        }
    }
}

/// Maintains the current roster by replaying backend roster events into a
/// published snapshot.
pub struct ParticipantRegistry {
    backend: Arc<dyn MediaBackend>,
    roster_tx: watch::Sender<Vec<Participant>>,
}

impl ParticipantRegistry {
    /// Create a registry with an empty roster.
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        let (roster_tx, _) = watch::channel(Vec::new());
        Self { backend, roster_tx }
    }

    /// Replace the snapshot with the backend's current participant list and
    /// publish it. Returns the new snapshot.
    pub fn refresh(&self) -> Vec<Participant> {
        let snapshot = self.backend.all_participants();
        debug!(
            target: "mb.roster",
            participants = snapshot.len(),
            "roster snapshot refreshed"
        );
        self.roster_tx.send_replace(snapshot.clone());
        snapshot
    }

    /// Drop every participant (session closed).
    pub fn clear(&self) {
        self.roster_tx.send_replace(Vec::new());
    }

    /// Current snapshot.
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.roster_tx.borrow().clone()
    }

    /// Observe snapshot replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Participant>> {
        self.roster_tx.subscribe()
    }

    /// Look up one participant in the current snapshot.
    #[must_use]
    pub fn participant(&self, entity_id: u64) -> Option<Participant> {
        self.roster_tx
            .borrow()
            .iter()
            .find(|p| p.id == entity_id)
            .cloned()
    }
}
