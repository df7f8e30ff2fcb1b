//! Pre-configured test data.

use media_bridge::config::SessionConfig;
use media_bridge::roster::Participant;

/// A participant with all media off.
#[must_use]
pub fn participant(id: u64, name: &str) -> Participant {
    Participant::new(id, name)
}

/// A participant currently capturing video.
#[must_use]
pub fn participant_with_video(id: u64, name: &str) -> Participant {
    Participant {
        video_on: true,
        ..Participant::new(id, name)
    }
}

/// A participant currently sharing their screen.
#[must_use]
pub fn participant_with_share(id: u64, name: &str) -> Participant {
    Participant {
        share_on: true,
        ..Participant::new(id, name)
    }
}

/// A valid session config for join tests.
#[must_use]
pub fn session_config() -> SessionConfig {
    SessionConfig::new("test-topic", "test-token", "alice")
}
