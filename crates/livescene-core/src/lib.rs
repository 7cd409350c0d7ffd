//! Core abstractions for live scene sessions.
//!
//! This crate provides the shared building blocks:
//! - `GenerationRequest` / `GenerationResponse` - what travels to and from the service
//! - `RenderBackend`, `RenderSurface`, `FrameScheduler` - the rendering seams
//! - `RenderSession` - one live scene and the resources it owns
//! - `NoticeStore` - user-visible notices with history
//! - Transport, generator, sandbox, and clipboard traits
//! - A headless host for the console client and tests

pub mod clipboard;
pub mod headless;
pub mod notice;
pub mod render;
pub mod request;
pub mod state;
pub mod traits;

pub use clipboard::{ClipboardError, ClipboardSink, MemoryClipboard};
pub use notice::{Notice, NoticeStore};
pub use render::{
    BackendError, DomNodeId, FrameScheduler, LoopToken, NodeId, OwnedResources, RenderBackend,
    RenderHost, RenderSession, RenderSurface, SessionId, SurfaceSize,
};
pub use request::{FailureOrigin, GenerationRequest, GenerationResponse, RequestError, RequestKind};
pub use state::{ChannelState, SessionPhase, UiState};
pub use traits::{GenerationTransport, GeneratorError, SandboxError, SceneGenerator, SceneSandbox};
