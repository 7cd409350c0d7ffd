//! Transport layer for scene generation requests.
//!
//! Provides:
//! - Wire protocol (JSON over WebSocket, JSON over HTTP)
//! - `DualChannel` - persistent WebSocket with HTTP fallback and reconnection
//! - Generation service router (feature: service)

pub mod channel;
pub mod config;
pub mod fallback;
pub mod protocol;

#[cfg(feature = "service")]
pub mod service;

pub use channel::DualChannel;
pub use config::{ChannelConfig, ReconnectPolicy};
pub use fallback::HttpFallback;
pub use protocol::{FallbackBody, FallbackReply, InboundMessage, OutboundMessage};
