//! Core traits for generation, transport, and scene evaluation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    ChannelState, GenerationRequest, GenerationResponse,
    render::{BackendError, RenderHost, RenderSession},
};

/// Error reported by a scene generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("No prompt provided")]
    EmptyPrompt,
    #[error("{0}")]
    Failed(String),
}

/// The remote service that turns prompts into scene code.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    /// Produce scene code for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;

    /// Produce a modified version of `original_code`.
    async fn modify(&self, prompt: &str, original_code: &str) -> Result<String, GeneratorError>;
}

/// Delivers generation requests to the service.
///
/// Implementations never fail the call itself: delivery problems come back
/// as a [`GenerationResponse::Failure`] with a transport origin.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn submit(&self, request: GenerationRequest) -> GenerationResponse;

    /// Current state of the persistent connection.
    fn state(&self) -> ChannelState;
}

#[async_trait]
impl<T: GenerationTransport + ?Sized> GenerationTransport for Arc<T> {
    async fn submit(&self, request: GenerationRequest) -> GenerationResponse {
        (**self).submit(request).await
    }

    fn state(&self) -> ChannelState {
        (**self).state()
    }
}

/// Error raised while evaluating scene code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("Syntax error: {0}")]
    Compile(String),
    #[error("{0}")]
    Runtime(String),
    #[error("Scene code did not initialize `{0}`")]
    MissingBinding(&'static str),
    #[error(transparent)]
    Host(#[from] BackendError),
}

/// Evaluates scene code into a live render session.
pub trait SceneSandbox: Send + Sync {
    /// Run `code` against `host`.
    ///
    /// On error nothing created by the code remains allocated.
    ///
    /// # Errors
    /// Returns error if the code fails to compile, throws, or leaves a
    /// required binding unset.
    fn run(&self, code: &str, host: &RenderHost) -> Result<RenderSession, SandboxError>;
}
