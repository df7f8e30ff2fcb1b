//! Bridge facade and backend event pump.
//!
//! [`MediaBridge`] wires the session controller, roster registry, attachment
//! managers and share controller around one injected backend handle, and
//! pumps the backend's ordered event stream into them from a single task so
//! events are processed strictly in emission order.

use crate::attachment::AttachmentManager;
use crate::backend::{BackendEvent, ConnectionEvent, MediaBackend};
use crate::config::{BridgeOptions, MediaOptions, SessionConfig, VideoQuality};
use crate::errors::BridgeError;
use crate::roster::{Participant, ParticipantRegistry};
use crate::session::{SessionController, SessionStatus};
use crate::share::{ShareController, ShareSession, ShareState};
use crate::views::{ContainerRegistry, ViewContainer, ViewKey};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Label of the container holding participant video views.
pub const VIDEO_CONTAINER: &str = "video";
/// Label of the container holding remote share views.
pub const SHARE_CONTAINER: &str = "share";
/// Label of the singleton active-share surface container.
pub const ACTIVE_SHARE_CONTAINER: &str = "active-share";

/// Running pump bookkeeping.
struct PumpState {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Facade over the coordination core.
pub struct MediaBridge {
    backend: Arc<dyn MediaBackend>,
    options: BridgeOptions,
    containers: ContainerRegistry,
    session: Arc<SessionController>,
    registry: Arc<ParticipantRegistry>,
    video_views: AttachmentManager,
    share_views: AttachmentManager,
    share: ShareController,
    quality: Arc<Mutex<VideoQuality>>,
    pump: Mutex<Option<PumpState>>,
}

impl MediaBridge {
    /// Wire a bridge around `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>, options: BridgeOptions) -> Self {
        let containers = ContainerRegistry::new();
        let video_container = containers.register(VIDEO_CONTAINER);
        let share_container = containers.register(SHARE_CONTAINER);
        let active_container = containers.register(ACTIVE_SHARE_CONTAINER);

        let session = Arc::new(SessionController::new(
            Arc::clone(&backend),
            options.init.clone(),
        ));
        let registry = Arc::new(ParticipantRegistry::new(Arc::clone(&backend)));

        let video_views = AttachmentManager::new(
            Arc::clone(&backend),
            video_container,
            session.subscribe(),
            options.detach_defer,
        );
        let share_views = AttachmentManager::new(
            Arc::clone(&backend),
            share_container,
            session.subscribe(),
            options.detach_defer,
        );
        let active_views = AttachmentManager::new(
            Arc::clone(&backend),
            active_container,
            session.subscribe(),
            options.detach_defer,
        );
        let share = ShareController::new(Arc::clone(&backend), session.subscribe(), active_views);

        let quality = Arc::new(Mutex::new(options.default_quality));

        Self {
            backend,
            options,
            containers,
            session,
            registry,
            video_views,
            share_views,
            share,
            quality,
            pump: Mutex::new(None),
        }
    }

    /// Start pumping backend events. Idempotent.
    pub fn start(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if pump.is_some() {
            debug!(target: "mb.pump", "event pump already running");
            return;
        }

        let events = self.backend.subscribe();
        let cancel = CancellationToken::new();
        let worker = EventPump {
            session: Arc::clone(&self.session),
            registry: Arc::clone(&self.registry),
            containers: self.containers.clone(),
            video_views: self.video_views.clone(),
            share_views: self.share_views.clone(),
            share: self.share.clone(),
            quality: Arc::clone(&self.quality),
        };
        let handle = tokio::spawn(worker.run(events, cancel.clone()));
        *pump = Some(PumpState { cancel, handle });
    }

    /// Stop pumping backend events (unsubscribe). Idempotent.
    pub fn stop(&self) {
        let state = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(state) = state {
            state.cancel.cancel();
            // Dropping the JoinHandle detaches the task; the cancel token
            // makes it exit on its next loop turn.
            drop(state.handle);
            debug!(target: "mb.pump", "event pump stopped");
        }
    }

    /// Activate the session: start the pump, then validate/init/join.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Configuration`] synchronously on missing required
    /// parameters. Init/join failures surface through [`Self::status`].
    pub async fn activate(
        &self,
        config: SessionConfig,
        media: MediaOptions,
    ) -> Result<(), BridgeError> {
        self.start();
        self.session.activate(config, media).await
    }

    /// Deactivate: leave if joined (errors swallowed), stop the pump, and
    /// force-clear every container and the roster. Never fails.
    pub async fn deactivate(&self) {
        self.stop();
        self.session.deactivate().await;
        let removed = self.containers.clear_all_views();
        self.registry.clear();
        if removed > 0 {
            info!(target: "mb.pump", removed, "views stripped on deactivation");
        }
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Observe session status transitions.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.session.subscribe()
    }

    /// Current roster snapshot.
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.registry.roster()
    }

    /// Observe roster snapshot replacements.
    #[must_use]
    pub fn subscribe_roster(&self) -> watch::Receiver<Vec<Participant>> {
        self.registry.subscribe()
    }

    /// Request to share the local screen.
    ///
    /// # Errors
    ///
    /// See [`ShareController::request_share`].
    pub async fn request_share(&self) -> Result<ShareSession, BridgeError> {
        self.share.request_share().await
    }

    /// Current local share state.
    #[must_use]
    pub fn share_state(&self) -> ShareState {
        self.share.state()
    }

    /// Observe local share transitions.
    #[must_use]
    pub fn subscribe_share(&self) -> broadcast::Receiver<ShareState> {
        self.share.subscribe()
    }

    /// Container registry (for embedders mounting additional containers).
    #[must_use]
    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// The participant video container.
    #[must_use]
    pub fn video_container(&self) -> ViewContainer {
        self.video_views.container().clone()
    }

    /// The remote share container.
    #[must_use]
    pub fn share_container(&self) -> ViewContainer {
        self.share_views.container().clone()
    }

    /// The singleton active-share surface container.
    #[must_use]
    pub fn active_share_container(&self) -> Option<ViewContainer> {
        self.containers.get(ACTIVE_SHARE_CONTAINER)
    }

    /// Currently requested video quality.
    #[must_use]
    pub fn quality(&self) -> VideoQuality {
        *self.quality.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the requested video quality and re-attach every live video
    /// view at the new quality.
    ///
    /// Attach is idempotent, so an attached view must be detached first for
    /// the new quality to take effect.
    pub async fn set_quality(&self, quality: VideoQuality) {
        *self.quality.lock().unwrap_or_else(PoisonError::into_inner) = quality;
        let roster = self.registry.roster();
        for participant in &roster {
            let key = ViewKey::video(participant.id);
            if participant.video_on && self.video_views.container().contains(key) {
                self.video_views.reconcile(key, false, quality).await;
            }
            self.video_views
                .reconcile(key, participant.video_on, quality)
                .await;
        }
    }

    /// Start local video (best-effort toggle).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn start_video(&self) -> Result<(), BridgeError> {
        self.toggle("start_video", self.backend.start_video().await)
    }

    /// Stop local video.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn stop_video(&self) -> Result<(), BridgeError> {
        self.toggle("stop_video", self.backend.stop_video().await)
    }

    /// Start local audio.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn start_audio(&self) -> Result<(), BridgeError> {
        self.toggle("start_audio", self.backend.start_audio().await)
    }

    /// Stop local audio.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn stop_audio(&self) -> Result<(), BridgeError> {
        self.toggle("stop_audio", self.backend.stop_audio().await)
    }

    /// Mute local audio.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn mute_audio(&self) -> Result<(), BridgeError> {
        self.toggle("mute_audio", self.backend.mute_audio().await)
    }

    /// Unmute local audio.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Media`] when the backend call fails.
    pub async fn unmute_audio(&self) -> Result<(), BridgeError> {
        self.toggle("unmute_audio", self.backend.unmute_audio().await)
    }

    fn toggle(
        &self,
        operation: &str,
        result: Result<(), crate::backend::BackendError>,
    ) -> Result<(), BridgeError> {
        result.map_err(|e| {
            let err = BridgeError::Media(format!("{operation} failed: {e}"));
            warn!(target: "mb.pump", error = %err, "media toggle failed");
            err
        })
    }

    /// Tunables this bridge was built with.
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }
}

impl Drop for MediaBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-task dispatcher preserving backend emission order.
struct EventPump {
    session: Arc<SessionController>,
    registry: Arc<ParticipantRegistry>,
    containers: ContainerRegistry,
    video_views: AttachmentManager,
    share_views: AttachmentManager,
    share: ShareController,
    quality: Arc<Mutex<VideoQuality>>,
}

impl EventPump {
    #[instrument(skip_all, name = "mb.pump")]
    async fn run(self, mut events: mpsc::Receiver<BackendEvent>, cancel: CancellationToken) {
        info!(target: "mb.pump", "event pump started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: "mb.pump", "event pump cancelled");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            debug!(target: "mb.pump", "backend event stream closed, exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn quality(&self) -> VideoQuality {
        *self.quality.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(&self, event: BackendEvent) {
        match event {
            BackendEvent::ConnectionChanged(connection) => {
                let closed = connection == ConnectionEvent::Closed;
                self.session.apply_connection_event(connection);
                if closed {
                    // The backend connection is gone; detach calls would be
                    // meaningless. Strip everything locally.
                    let removed = self.containers.clear_all_views();
                    self.registry.clear();
                    info!(
                        target: "mb.pump",
                        removed,
                        "session closed, stripped all views"
                    );
                }
            }

            BackendEvent::RosterAdded { entity_ids } | BackendEvent::RosterUpdated { entity_ids } => {
                debug!(target: "mb.pump", ?entity_ids, "roster changed");
                let roster = self.registry.refresh();
                self.reconcile_roster(&roster).await;
            }

            BackendEvent::RosterRemoved { entity_ids } => {
                debug!(target: "mb.pump", ?entity_ids, "participants removed");
                let roster = self.registry.refresh();
                for entity_id in entity_ids {
                    // Deferred teardown: a quick re-add keeps the views.
                    self.video_views.release(ViewKey::video(entity_id));
                    self.share_views.release(ViewKey::share(entity_id));
                }
                self.reconcile_roster(&roster).await;
            }

            BackendEvent::VideoCaptureChanged { entity_id, on } => {
                self.registry.refresh();
                self.video_views
                    .reconcile(ViewKey::video(entity_id), on, self.quality())
                    .await;
            }

            BackendEvent::AudioStateChanged { entity_id, on } => {
                debug!(target: "mb.pump", entity_id, on, "audio state changed");
                self.registry.refresh();
            }

            BackendEvent::ShareStateChanged { entity_id, on } => {
                self.registry.refresh();
                self.share_views
                    .reconcile(ViewKey::share(entity_id), on, self.quality())
                    .await;
            }

            BackendEvent::ActiveShareChanged { state, entity_id } => {
                self.share.apply_active_share(state, entity_id).await;
            }

            BackendEvent::PassiveShareStopped => {
                self.share.passive_stop();
            }
        }
    }

    /// Reconcile every participant's video and share views against the
    /// snapshot flags.
    async fn reconcile_roster(&self, roster: &[Participant]) {
        let quality = self.quality();
        for participant in roster {
            self.video_views
                .reconcile(ViewKey::video(participant.id), participant.video_on, quality)
                .await;
            self.share_views
                .reconcile(ViewKey::share(participant.id), participant.share_on, quality)
                .await;
        }
    }
}
