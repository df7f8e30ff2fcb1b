//! Bridge error types.
//!
//! The taxonomy separates the one fatal error class (configuration) from the
//! contained classes. Containment policy: asynchronous media failures are
//! captured into observable state or logged, never propagated in a way that
//! can crash the embedding application.

use crate::views::ViewKind;
use thiserror::Error;

/// Media bridge error type.
///
/// Propagation policy:
/// - `Configuration` is returned synchronously from [`crate::session::SessionController::activate`]
///   before any backend call is made.
/// - `Privilege`, `Connection` and `Share` are returned from
///   [`crate::share::ShareController::request_share`] as pre-flight or start
///   failures.
/// - `Media` is returned from the facade's local audio/video toggles.
/// - `Attachment`, `Detachment` and `Leave` are logged and contained; they
///   never cross the public API boundary as `Err`.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Required join parameter missing or empty. Fatal, never auto-retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend init/join failed or an operation was attempted outside an
    /// active session. Recoverable via explicit re-activation.
    #[error("connection error: {0}")]
    Connection(String),

    /// Backend view attach failed. The entity stays viewless until the next
    /// desired-state change retries naturally.
    #[error("failed to attach {kind} view for entity {entity_id}: {reason}")]
    Attachment {
        entity_id: u64,
        kind: ViewKind,
        reason: String,
    },

    /// Backend view detach failed. Local view cleanup proceeds regardless.
    #[error("failed to detach {kind} view for entity {entity_id}: {reason}")]
    Detachment {
        entity_id: u64,
        kind: ViewKind,
        reason: String,
    },

    /// Share requested while sharing is locked by policy. Aborted before any
    /// backend call.
    #[error("share privilege error: {0}")]
    Privilege(String),

    /// Backend share start/stop failed.
    #[error("share error: {0}")]
    Share(String),

    /// Audio/video toggle failed. Best-effort, non-fatal.
    #[error("media error: {0}")]
    Media(String),

    /// Backend leave failed during deactivation. Logged and swallowed;
    /// deactivation always completes.
    #[error("leave error: {0}")]
    Leave(String),
}

impl BridgeError {
    /// Whether this error is fatal for the caller.
    ///
    /// Only configuration errors are fatal; everything else is contained as
    /// observable state or a logged warning.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Configuration(_))
    }

    /// Whether the caller can recover by re-invoking the failed operation
    /// (after fixing external conditions).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(BridgeError::Configuration("missing topic".to_string()).is_fatal());

        assert!(!BridgeError::Connection("join failed".to_string()).is_fatal());
        assert!(!BridgeError::Privilege("share locked".to_string()).is_fatal());
        assert!(!BridgeError::Share("start failed".to_string()).is_fatal());
        assert!(!BridgeError::Media("start_video failed".to_string()).is_fatal());
        assert!(!BridgeError::Leave("timeout".to_string()).is_fatal());
        assert!(!BridgeError::Attachment {
            entity_id: 7,
            kind: ViewKind::Video,
            reason: "backend refused".to_string(),
        }
        .is_fatal());
        assert!(!BridgeError::Detachment {
            entity_id: 7,
            kind: ViewKind::Share,
            reason: "timeout".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_retryable_is_inverse_of_fatal() {
        assert!(!BridgeError::Configuration("missing".to_string()).is_retryable());
        assert!(BridgeError::Connection("down".to_string()).is_retryable());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", BridgeError::Configuration("topic is required".to_string())),
            "configuration error: topic is required"
        );

        assert_eq!(
            format!(
                "{}",
                BridgeError::Attachment {
                    entity_id: 42,
                    kind: ViewKind::Video,
                    reason: "backend timeout".to_string(),
                }
            ),
            "failed to attach video view for entity 42: backend timeout"
        );

        assert_eq!(
            format!(
                "{}",
                BridgeError::Detachment {
                    entity_id: 9,
                    kind: ViewKind::Share,
                    reason: "gone".to_string(),
                }
            ),
            "failed to detach share view for entity 9: gone"
        );
    }
}
