//! Per-entity media attachment reconciliation.
//!
//! Reconciles "desired visual state" (on/off) against "actual attached view"
//! for every `(entity, kind)` pair, guaranteeing exactly one view per live
//! entity in the target container: no duplicates, no leaks, under racing
//! attach/detach calls, rapid toggling and spurious setup/teardown churn.
//!
//! # Concurrency rules
//!
//! - At most one attach-or-detach is in flight per [`ViewKey`], enforced by
//!   a real mutex-protected in-flight set with RAII guards. A request
//!   arriving while one is in flight is dropped, not queued: the next
//!   desired-state change reissues the correct final request. A request
//!   superseded before its guard is released is therefore lost until then
//!   (known, accepted).
//! - In-flight backend calls are never cancelled. Stale results are detected
//!   after the fact: the returned view is discarded when the container
//!   already holds one for the key, or when the last observed desired state
//!   flipped to "off" while the call was pending. A racing reconciliation
//!   that still wants the view on does not invalidate the in-flight attach;
//!   the in-flight one is authoritative.
//! - [`release`] does not detach synchronously. It marks the key undesired
//!   (so a still-pending attach discards its view on resolution), captures
//!   the entity's generation and checks again after a deferral window; a
//!   fresh reconciliation in the window suppresses the detach (remount
//!   churn), a closed session downgrades it to a local strip.
//!
//! [`release`]: AttachmentManager::release

use crate::backend::MediaBackend;
use crate::config::VideoQuality;
use crate::errors::BridgeError;
use crate::session::SessionStatus;
use crate::views::{ViewContainer, ViewKey, ViewKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Per-entity reconciliation bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
struct EntityState {
    /// Bumped at the start of every reconciliation; lets a deferred release
    /// detect that a fresh reconciliation (remount) started in the window.
    generation: u64,
    /// Last desired state observed; lets a resolved attach detect that it
    /// was superseded by an "off" while in flight.
    desired: bool,
}

/// RAII marker for an in-flight attach/detach operation on one key.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<ViewKey>>>,
    key: ViewKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Reconciles desired visual state against attached views for one container.
///
/// Cheap to clone; clones share the in-flight set, generation table and
/// container, so any number of logical callers observe the same per-entity
/// serialization.
#[derive(Clone)]
pub struct AttachmentManager {
    backend: Arc<dyn MediaBackend>,
    container: ViewContainer,
    session: watch::Receiver<SessionStatus>,
    in_flight: Arc<Mutex<HashSet<ViewKey>>>,
    entities: Arc<Mutex<HashMap<ViewKey, EntityState>>>,
    detach_defer: Duration,
}

impl AttachmentManager {
    /// Create a manager reconciling into `container`.
    ///
    /// `session` is observed (not driven) to decide whether a deferred
    /// detach may still talk to the backend.
    #[must_use]
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        container: ViewContainer,
        session: watch::Receiver<SessionStatus>,
        detach_defer: Duration,
    ) -> Self {
        Self {
            backend,
            container,
            session,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            entities: Arc::new(Mutex::new(HashMap::new())),
            detach_defer,
        }
    }

    /// The container this manager reconciles into.
    #[must_use]
    pub fn container(&self) -> &ViewContainer {
        &self.container
    }

    fn entities(&self) -> MutexGuard<'_, HashMap<ViewKey, EntityState>> {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self, key: ViewKey) -> u64 {
        self.entities().get(&key).copied().unwrap_or_default().generation
    }

    fn desired(&self, key: ViewKey) -> bool {
        self.entities().get(&key).copied().unwrap_or_default().desired
    }

    /// Record a fresh reconciliation: bump the generation and store the
    /// observed desired state.
    fn begin_reconciliation(&self, key: ViewKey, desired: bool) {
        let mut entities = self.entities();
        let state = entities.entry(key).or_default();
        state.generation += 1;
        state.desired = desired;
    }

    /// Try to mark `key` as having an operation in flight.
    ///
    /// `None` means another operation owns the key; the caller must drop its
    /// request rather than queue it.
    fn try_begin(&self, key: ViewKey) -> Option<InFlightGuard> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key,
        })
    }

    /// Compare desired state to actual attached state and issue the minimal
    /// attach/detach call needed.
    ///
    /// Call whenever the desired state, the entity, or the requested quality
    /// changes. `quality` only applies to [`ViewKind::Video`] keys.
    pub async fn reconcile(&self, key: ViewKey, desired: bool, quality: VideoQuality) {
        self.begin_reconciliation(key, desired);
        if desired {
            self.attach(key, quality).await;
        } else {
            self.detach(key).await;
        }
    }

    /// Logical teardown for `key`, deferred by the configured window.
    ///
    /// The key is marked undesired immediately, so an attach still in flight
    /// when the release lands discards its view on resolution instead of
    /// inserting it. If a fresh reconciliation for the same key starts before
    /// the deferred check runs, the detach is suppressed and the view stays
    /// attached. If the session has closed by then, the backend call is
    /// skipped and the views are stripped locally. Otherwise the real detach
    /// path runs.
    pub fn release(&self, key: ViewKey) {
        let generation = {
            let mut entities = self.entities();
            let state = entities.entry(key).or_default();
            state.desired = false;
            state.generation
        };
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(manager.detach_defer).await;

            if manager.generation(key) != generation {
                debug!(
                    target: "mb.attach",
                    %key,
                    "release superseded by a fresh reconciliation, keeping view"
                );
                return;
            }

            if !manager.session.borrow().is_in_session() {
                let removed = manager.container.remove_all(key);
                debug!(
                    target: "mb.attach",
                    %key,
                    removed,
                    "session no longer live, stripped views without backend detach"
                );
                return;
            }

            manager.detach(key).await;
        });
    }

    /// Idempotent attach: no-op when a view is already present, dropped when
    /// another operation is in flight for the key.
    async fn attach(&self, key: ViewKey, quality: VideoQuality) {
        if self.container.contains(key) {
            debug!(target: "mb.attach", %key, "view already attached, skipping attach");
            return;
        }

        let Some(_guard) = self.try_begin(key) else {
            debug!(target: "mb.attach", %key, "attach dropped, operation already in flight");
            return;
        };

        let result = match key.kind {
            ViewKind::Video => self.backend.attach_video(key.entity_id, quality).await,
            ViewKind::Share => self.backend.attach_share_view(key.entity_id).await,
        };

        match result {
            Ok(view) => {
                // The desired state may have flipped to "off" while the call
                // was pending; a stale view must not land in the container.
                // A racing "on" does not invalidate this result.
                if !self.desired(key) {
                    debug!(
                        target: "mb.attach",
                        %key,
                        view_id = %view.view_id,
                        "attach superseded by off while in flight, discarding view"
                    );
                    return;
                }
                if let Err(stale) = self.container.insert_if_absent(view) {
                    debug!(
                        target: "mb.attach",
                        %key,
                        view_id = %stale.view_id,
                        "concurrent attach already inserted a view, discarding duplicate"
                    );
                }
            }
            Err(e) => {
                let err = BridgeError::Attachment {
                    entity_id: key.entity_id,
                    kind: key.kind,
                    reason: e.to_string(),
                };
                // Non-fatal: the entity stays viewless until the next
                // desired-state change retries naturally.
                error!(target: "mb.attach", %key, error = %err, "attach failed");
            }
        }
    }

    /// Idempotent detach: no-op when nothing is attached, dropped when
    /// another operation is in flight. Local views are stripped whether or
    /// not the backend call succeeds.
    async fn detach(&self, key: ViewKey) {
        if !self.container.contains(key) {
            debug!(target: "mb.attach", %key, "no view attached, skipping detach");
            return;
        }

        let Some(_guard) = self.try_begin(key) else {
            debug!(target: "mb.attach", %key, "detach dropped, operation already in flight");
            return;
        };

        let result = match key.kind {
            ViewKind::Video => self.backend.detach_video(key.entity_id).await,
            ViewKind::Share => self.backend.detach_share_view(key.entity_id).await,
        };

        if let Err(e) = result {
            let err = BridgeError::Detachment {
                entity_id: key.entity_id,
                kind: key.kind,
                reason: e.to_string(),
            };
            warn!(
                target: "mb.attach",
                %key,
                error = %err,
                "backend detach failed, stripping local views anyway"
            );
        }

        let removed = self.container.remove_all(key);
        debug!(target: "mb.attach", %key, removed, "views stripped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_excludes_and_releases() {
        let set: Arc<Mutex<HashSet<ViewKey>>> = Arc::new(Mutex::new(HashSet::new()));
        let key = ViewKey::video(1);

        let guard = {
            let mut locked = set.lock().unwrap();
            assert!(locked.insert(key));
            InFlightGuard {
                set: Arc::clone(&set),
                key,
            }
        };

        // Second begin for the same key is refused while the guard lives.
        assert!(!set.lock().unwrap().insert(key));

        drop(guard);
        assert!(set.lock().unwrap().insert(key), "drop must release the key");
    }

    #[test]
    fn test_guards_for_distinct_keys_are_independent() {
        let set: Arc<Mutex<HashSet<ViewKey>>> = Arc::new(Mutex::new(HashSet::new()));
        assert!(set.lock().unwrap().insert(ViewKey::video(1)));
        assert!(set.lock().unwrap().insert(ViewKey::share(1)));
        assert!(set.lock().unwrap().insert(ViewKey::video(2)));
    }
}
