//! Session and bridge configuration.
//!
//! Configuration is provided programmatically by the embedder. Sensitive
//! fields (auth token, session password) are redacted in Debug output.

use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default deferral window before a released view is actually detached.
///
/// A re-reconciliation for the same entity inside this window suppresses the
/// detach, distinguishing genuine teardown from transient setup/teardown
/// churn in the embedding layer.
pub const DEFAULT_DETACH_DEFER: Duration = Duration::from_millis(25);

/// Default buffer size for the backend event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Requested video quality for attached views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoQuality {
    /// 90p thumbnail quality.
    Q90,
    /// 180p gallery quality.
    Q180,
    /// 360p standard quality.
    #[default]
    Q360,
    /// 720p speaker quality.
    Q720,
}

/// Parameters for one join attempt.
///
/// Immutable per attempt; identity is deep value equality so that an
/// embedder recreating an equivalent config on every render does not force
/// a needless rejoin.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session topic (room name). Required.
    pub topic: String,
    /// Signed auth token. Required. Redacted in Debug output.
    pub auth_token: String,
    /// Display name of the local user. Required.
    pub user_name: String,
    /// Optional session password. Redacted in Debug output.
    pub password: Option<String>,
    /// Optional idle timeout in minutes.
    pub idle_timeout_minutes: Option<u32>,
}

impl SessionConfig {
    /// Create a config with the three required fields.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        auth_token: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            auth_token: auth_token.into(),
            user_name: user_name.into(),
            password: None,
            idle_timeout_minutes: None,
        }
    }

    /// Set the session password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the idle timeout in minutes.
    #[must_use]
    pub fn with_idle_timeout_minutes(mut self, minutes: u32) -> Self {
        self.idle_timeout_minutes = Some(minutes);
        self
    }

    /// Validate the required join parameters.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] naming the first missing field.
    /// Validation runs synchronously before any backend call.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.topic.trim().is_empty() {
            return Err(BridgeError::Configuration("topic is required".to_string()));
        }
        if self.auth_token.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "auth_token is required".to_string(),
            ));
        }
        if self.user_name.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "user_name is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("topic", &self.topic)
            .field("auth_token", &"[REDACTED]")
            .field("user_name", &self.user_name)
            .field(
                "password",
                &self.password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("idle_timeout_minutes", &self.idle_timeout_minutes)
            .finish()
    }
}

/// Media behavior flags for a join attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOptions {
    /// Do not start audio after joining.
    pub disable_audio: bool,
    /// Do not start video after joining.
    pub disable_video: bool,
    /// Record the config but perform no backend calls until `activate` is
    /// invoked again with this flag cleared.
    pub wait_before_joining: bool,
    /// On deactivation, end the session for everyone (host only; non-hosts
    /// requesting this are warned and leave individually).
    pub end_on_leave: bool,
}

/// Backend initialization parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOptions {
    /// UI language tag passed to the backend.
    pub language: String,
    /// Asset loading strategy identifier (e.g. CDN base or "Global").
    pub asset_strategy: String,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            asset_strategy: "Global".to_string(),
        }
    }
}

/// Tunables for the bridge itself.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Backend init parameters.
    pub init: InitOptions,
    /// Deferral window for released views (see [`DEFAULT_DETACH_DEFER`]).
    pub detach_defer: Duration,
    /// Default quality requested for video views.
    pub default_quality: VideoQuality,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            init: InitOptions::default(),
            detach_defer: DEFAULT_DETACH_DEFER,
            default_quality: VideoQuality::default(),
        }
    }
}
