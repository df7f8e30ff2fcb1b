//! Scriptable mock media backend.
//!
//! Implements the full [`MediaBackend`] capability trait with:
//!
//! - per-operation failure injection ([`FailFlags`])
//! - configurable attach/detach latency driven by tokio time, so paused-time
//!   tests can open precise race windows
//! - call counters ([`CallCounts`]) for idempotence assertions
//! - event injection into every subscribed receiver

use async_trait::async_trait;
use media_bridge::backend::{
    BackendError, BackendEvent, MediaBackend, SessionInfo, ShareSurface,
};
use media_bridge::config::{InitOptions, SessionConfig, VideoQuality};
use media_bridge::roster::Participant;
use media_bridge::views::{MediaView, ViewKey};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Buffer size for injected event channels.
const EVENT_BUFFER: usize = 256;

/// Per-operation failure switches. All off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFlags {
    pub init: bool,
    pub join: bool,
    pub leave: bool,
    pub attach_video: bool,
    pub detach_video: bool,
    pub attach_share: bool,
    pub detach_share: bool,
    pub share_start: bool,
    pub share_stop: bool,
    pub audio: bool,
    pub video: bool,
}

/// Number of times each backend operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub init: u32,
    pub join: u32,
    pub leave: u32,
    pub attach_video: u32,
    pub detach_video: u32,
    pub attach_share: u32,
    pub detach_share: u32,
    pub share_start: u32,
    pub share_stop: u32,
    pub start_audio: u32,
    pub stop_audio: u32,
    pub mute_audio: u32,
    pub unmute_audio: u32,
    pub start_video: u32,
    pub stop_video: u32,
}

#[derive(Debug, Default)]
struct MockState {
    participants: Vec<Participant>,
    is_host: bool,
    in_meeting: bool,
    local_user_id: u64,
    share_locked: bool,
    surface_video_capable: bool,
    attach_latency: Duration,
    detach_latency: Duration,
    fail: FailFlags,
    calls: CallCounts,
    last_leave_end_for_everyone: Option<bool>,
    last_share_surface: Option<ShareSurface>,
    last_attach_quality: Option<VideoQuality>,
}

/// Scriptable mock backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    senders: Mutex<Vec<mpsc::Sender<BackendEvent>>>,
}

impl MockBackend {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// The `end_for_everyone` flag of the most recent leave call.
    #[must_use]
    pub fn last_leave_end_for_everyone(&self) -> Option<bool> {
        self.lock().last_leave_end_for_everyone
    }

    /// The surface of the most recent share start call.
    #[must_use]
    pub fn last_share_surface(&self) -> Option<ShareSurface> {
        self.lock().last_share_surface
    }

    /// The quality of the most recent video attach call.
    #[must_use]
    pub fn last_attach_quality(&self) -> Option<VideoQuality> {
        self.lock().last_attach_quality
    }

    /// Replace the scripted roster.
    pub fn set_participants(&self, participants: Vec<Participant>) {
        self.lock().participants = participants;
    }

    /// Toggle the share lock.
    pub fn set_share_locked(&self, locked: bool) {
        self.lock().share_locked = locked;
    }

    /// Replace the failure switches.
    pub fn set_fail(&self, fail: FailFlags) {
        self.lock().fail = fail;
    }

    /// Force the in-meeting flag (normally driven by join/leave).
    pub fn set_in_meeting(&self, in_meeting: bool) {
        self.lock().in_meeting = in_meeting;
    }

    /// Inject an event into every live subscription, in call order.
    pub async fn push_event(&self, event: BackendEvent) {
        let senders: Vec<mpsc::Sender<BackendEvent>> = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(target: "mb.mock", ?event, subscribers = senders.len(), "injecting event");
        for sender in senders {
            // Closed receivers are simply skipped.
            let _ = sender.send(event.clone()).await;
        }
    }

    async fn attach_delay(&self) {
        let latency = self.lock().attach_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn detach_delay(&self) {
        let latency = self.lock().detach_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MediaBackend for MockBackend {
    async fn init(&self, _options: &InitOptions) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.init += 1;
            state.fail.init
        };
        if fail {
            return Err(BackendError::new("scripted init failure"));
        }
        Ok(())
    }

    async fn join(&self, _config: &SessionConfig) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.join += 1;
            state.fail.join
        };
        if fail {
            return Err(BackendError::new("scripted join failure"));
        }
        self.lock().in_meeting = true;
        Ok(())
    }

    async fn leave(&self, end_for_everyone: bool) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.leave += 1;
            state.last_leave_end_for_everyone = Some(end_for_everyone);
            state.fail.leave
        };
        if fail {
            return Err(BackendError::new("scripted leave failure"));
        }
        self.lock().in_meeting = false;
        Ok(())
    }

    fn is_host(&self) -> bool {
        self.lock().is_host
    }

    fn session_info(&self) -> SessionInfo {
        let state = self.lock();
        SessionInfo {
            in_meeting: state.in_meeting,
            local_user_id: state.local_user_id,
        }
    }

    fn all_participants(&self) -> Vec<Participant> {
        self.lock().participants.clone()
    }

    async fn attach_video(
        &self,
        entity_id: u64,
        quality: VideoQuality,
    ) -> Result<MediaView, BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.attach_video += 1;
            state.last_attach_quality = Some(quality);
            state.fail.attach_video
        };
        self.attach_delay().await;
        if fail {
            return Err(BackendError::new("scripted attach_video failure"));
        }
        Ok(MediaView::new(ViewKey::video(entity_id)))
    }

    async fn detach_video(&self, _entity_id: u64) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.detach_video += 1;
            state.fail.detach_video
        };
        self.detach_delay().await;
        if fail {
            return Err(BackendError::new("scripted detach_video failure"));
        }
        Ok(())
    }

    async fn attach_share_view(&self, entity_id: u64) -> Result<MediaView, BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.attach_share += 1;
            state.fail.attach_share
        };
        self.attach_delay().await;
        if fail {
            return Err(BackendError::new("scripted attach_share failure"));
        }
        Ok(MediaView::new(ViewKey::share(entity_id)))
    }

    async fn detach_share_view(&self, _entity_id: u64) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.detach_share += 1;
            state.fail.detach_share
        };
        self.detach_delay().await;
        if fail {
            return Err(BackendError::new("scripted detach_share failure"));
        }
        Ok(())
    }

    async fn start_share_screen(&self, surface: ShareSurface) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.share_start += 1;
            state.last_share_surface = Some(surface);
            state.fail.share_start
        };
        if fail {
            return Err(BackendError::new("scripted share start failure"));
        }
        Ok(())
    }

    async fn stop_share_screen(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.share_stop += 1;
            state.fail.share_stop
        };
        if fail {
            return Err(BackendError::new("scripted share stop failure"));
        }
        Ok(())
    }

    fn is_share_locked(&self) -> bool {
        self.lock().share_locked
    }

    fn is_share_surface_video_capable(&self) -> bool {
        self.lock().surface_video_capable
    }

    async fn start_audio(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.start_audio += 1;
            state.fail.audio
        };
        if fail {
            return Err(BackendError::new("scripted audio failure"));
        }
        Ok(())
    }

    async fn stop_audio(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.stop_audio += 1;
            state.fail.audio
        };
        if fail {
            return Err(BackendError::new("scripted audio failure"));
        }
        Ok(())
    }

    async fn mute_audio(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.mute_audio += 1;
            state.fail.audio
        };
        if fail {
            return Err(BackendError::new("scripted audio failure"));
        }
        Ok(())
    }

    async fn unmute_audio(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.unmute_audio += 1;
            state.fail.audio
        };
        if fail {
            return Err(BackendError::new("scripted audio failure"));
        }
        Ok(())
    }

    async fn start_video(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.start_video += 1;
            state.fail.video
        };
        if fail {
            return Err(BackendError::new("scripted video failure"));
        }
        Ok(())
    }

    async fn stop_video(&self) -> Result<(), BackendError> {
        let fail = {
            let mut state = self.lock();
            state.calls.stop_video += 1;
            state.fail.video
        };
        if fail {
            return Err(BackendError::new("scripted video failure"));
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<BackendEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

/// Builder for [`MockBackend`] configuration.
#[derive(Debug, Default)]
pub struct MockBackendBuilder {
    participants: Vec<Participant>,
    is_host: bool,
    in_meeting: bool,
    local_user_id: u64,
    share_locked: bool,
    surface_video_capable: bool,
    attach_latency: Duration,
    detach_latency: Duration,
    fail: FailFlags,
}

impl MockBackendBuilder {
    /// Script the initial roster.
    #[must_use]
    pub fn participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = participants;
        self
    }

    /// Give the local user host privileges.
    #[must_use]
    pub fn host(mut self) -> Self {
        self.is_host = true;
        self
    }

    /// Start already in a meeting.
    #[must_use]
    pub fn in_meeting(mut self) -> Self {
        self.in_meeting = true;
        self
    }

    /// Set the local user id.
    #[must_use]
    pub fn local_user_id(mut self, id: u64) -> Self {
        self.local_user_id = id;
        self
    }

    /// Lock sharing by policy.
    #[must_use]
    pub fn share_locked(mut self) -> Self {
        self.share_locked = true;
        self
    }

    /// Make the share surface video-capable.
    #[must_use]
    pub fn video_capable_surface(mut self) -> Self {
        self.surface_video_capable = true;
        self
    }

    /// Latency applied to every attach call.
    #[must_use]
    pub fn attach_latency(mut self, latency: Duration) -> Self {
        self.attach_latency = latency;
        self
    }

    /// Latency applied to every detach call.
    #[must_use]
    pub fn detach_latency(mut self, latency: Duration) -> Self {
        self.detach_latency = latency;
        self
    }

    /// Set the failure switches.
    #[must_use]
    pub fn fail(mut self, fail: FailFlags) -> Self {
        self.fail = fail;
        self
    }

    /// Build the mock.
    #[must_use]
    pub fn build(self) -> MockBackend {
        MockBackend {
            state: Mutex::new(MockState {
                participants: self.participants,
                is_host: self.is_host,
                in_meeting: self.in_meeting,
                local_user_id: self.local_user_id,
                share_locked: self.share_locked,
                surface_video_capable: self.surface_video_capable,
                attach_latency: self.attach_latency,
                detach_latency: self.detach_latency,
                fail: self.fail,
                calls: CallCounts::default(),
                last_leave_end_for_everyone: None,
                last_share_surface: None,
                last_attach_quality: None,
            }),
            senders: Mutex::new(Vec::new()),
        }
    }
}
