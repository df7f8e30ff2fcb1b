//! View containers and attached-view bookkeeping.
//!
//! A [`ViewContainer`] is the mount point to which backend-returned views are
//! appended. The central invariant lives here: at most one view per
//! `(entity_id, kind)` may exist in a container at any time. Insertion is a
//! single check-and-insert under the container lock so the invariant cannot
//! be broken by interleaved reconciliations.
//!
//! Containers are passed explicitly into every reconciliation call; nothing
//! resolves them from ambient scope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// The kind of media feed a view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewKind {
    /// A participant's camera feed.
    Video,
    /// A participant's screen-share feed.
    Share,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::Video => write!(f, "video"),
            ViewKind::Share => write!(f, "share"),
        }
    }
}

/// Identity of a visual entity: a participant feed of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    /// Backend-assigned participant/entity id.
    pub entity_id: u64,
    /// Feed kind.
    pub kind: ViewKind,
}

impl ViewKey {
    /// Key for a participant's video feed.
    #[must_use]
    pub fn video(entity_id: u64) -> Self {
        Self {
            entity_id,
            kind: ViewKind::Video,
        }
    }

    /// Key for a participant's screen-share feed.
    #[must_use]
    pub fn share(entity_id: u64) -> Self {
        Self {
            entity_id,
            kind: ViewKind::Share,
        }
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.kind)
    }
}

/// A live rendering-surface handle returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaView {
    /// The entity this view renders.
    pub key: ViewKey,
    /// Unique handle id for this particular surface instance.
    pub view_id: Uuid,
}

impl MediaView {
    /// Create a view handle with a fresh surface id.
    #[must_use]
    pub fn new(key: ViewKey) -> Self {
        Self {
            key,
            view_id: Uuid::new_v4(),
        }
    }
}

/// Shared state of one container.
#[derive(Debug, Default)]
struct ContainerInner {
    views: HashMap<ViewKey, MediaView>,
}

/// A mount point holding attached views.
///
/// Cheap to clone; clones share the same underlying container. The lock is
/// a `std::sync::Mutex` with short critical sections, never held across an
/// `.await`.
#[derive(Debug, Clone)]
pub struct ViewContainer {
    label: Arc<str>,
    inner: Arc<Mutex<ContainerInner>>,
}

impl ViewContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Arc::from(label.into()),
            inner: Arc::new(Mutex::new(ContainerInner::default())),
        }
    }

    /// Container label (for logging and registry lookup).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, ContainerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a view for `key` is currently attached.
    #[must_use]
    pub fn contains(&self, key: ViewKey) -> bool {
        self.lock().views.contains_key(&key)
    }

    /// Get a clone of the attached view for `key`, if any.
    #[must_use]
    pub fn view(&self, key: ViewKey) -> Option<MediaView> {
        self.lock().views.get(&key).cloned()
    }

    /// Insert `view` unless a view for the same key is already attached.
    ///
    /// # Errors
    ///
    /// Returns the rejected view if one already exists, so the caller can
    /// discard the stale surface instead of creating a duplicate.
    pub fn insert_if_absent(&self, view: MediaView) -> Result<(), MediaView> {
        let mut inner = self.lock();
        if inner.views.contains_key(&view.key) {
            return Err(view);
        }
        inner.views.insert(view.key, view);
        Ok(())
    }

    /// Remove every view matching `key`. Returns the number removed.
    ///
    /// Idempotent; safe to call whether or not anything is attached.
    pub fn remove_all(&self, key: ViewKey) -> usize {
        usize::from(self.lock().views.remove(&key).is_some())
    }

    /// Strip every view from the container. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.views.len();
        inner.views.clear();
        removed
    }

    /// Snapshot of the currently attached keys.
    #[must_use]
    pub fn keys(&self) -> Vec<ViewKey> {
        self.lock().views.keys().copied().collect()
    }

    /// Number of attached views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().views.len()
    }

    /// Whether the container holds no views.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().views.is_empty()
    }
}

/// Registry associating container labels with live containers.
///
/// All containers can be force-cleared in one pass when the session closes.
#[derive(Debug, Clone, Default)]
pub struct ContainerRegistry {
    containers: Arc<Mutex<HashMap<String, ViewContainer>>>,
}

impl ContainerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ViewContainer>> {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or fetch) the container with the given label.
    pub fn register(&self, label: &str) -> ViewContainer {
        self.lock()
            .entry(label.to_string())
            .or_insert_with(|| ViewContainer::new(label))
            .clone()
    }

    /// Look up a registered container.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<ViewContainer> {
        self.lock().get(label).cloned()
    }

    /// Remove a container from the registry, returning it if present.
    pub fn unregister(&self, label: &str) -> Option<ViewContainer> {
        self.lock().remove(label)
    }

    /// Strip every view from every registered container.
    ///
    /// Used on session close, where backend detach calls would be
    /// meaningless. Returns the total number of views removed.
    pub fn clear_all_views(&self) -> usize {
        let containers: Vec<ViewContainer> = self.lock().values().cloned().collect();
        containers.iter().map(ViewContainer::clear).sum()
    }

    /// Labels of all registered containers.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
