//! Live scene session orchestration.
//!
//! Provides:
//! - `RenderLifecycle` - owns the single live render session
//! - `SessionManager` - turns generate/modify/copy/resize intents into scenes
//! - `IntervalScheduler` - tokio-driven animation loops

pub mod lifecycle;
pub mod manager;
pub mod scheduler;

pub use lifecycle::RenderLifecycle;
pub use manager::{IntentError, SessionManager};
pub use scheduler::{DEFAULT_FRAME_INTERVAL, IntervalScheduler};
