//! # Media Bridge Test Utilities
//!
//! Shared test utilities for the media-bridge crate.
//!
//! Provides a scriptable mock backend and test fixtures for isolated
//! testing without a real media engine.
//!
//! ## Modules
//!
//! - `mock_backend` - Scriptable [`MockBackend`] implementing the full
//!   backend capability trait: per-operation failure injection, attach
//!   latency (tokio time, works with paused clocks), call counters and
//!   event injection.
//! - `fixtures` - Pre-configured participants and session configs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mb_test_utils::{fixtures, MockBackend};
//! use std::sync::Arc;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let backend = Arc::new(
//!         MockBackend::builder()
//!             .participants(vec![fixtures::participant_with_video(1, "alice")])
//!             .attach_latency(std::time::Duration::from_millis(100))
//!             .build(),
//!     );
//!
//!     // Drive the bridge, advance time, assert on backend.calls()...
//! }
//! ```

use std::sync::Once;

pub mod fixtures;
pub mod mock_backend;

pub use mock_backend::{CallCounts, FailFlags, MockBackend, MockBackendBuilder};

static INIT_LOGGING: Once = Once::new();

/// Install a process-wide test subscriber honoring `RUST_LOG`.
///
/// Idempotent; call it from every test's setup helper.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
