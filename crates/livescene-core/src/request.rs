//! Generation requests and responses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the user asked the generation service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Build a new scene from a prompt.
    Generate,
    /// Change the previously accepted scene code.
    Modify,
}

/// Request validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("prompt is empty")]
    EmptyPrompt,
}

/// A single request for scene code.
///
/// Only constructible through [`GenerationRequest::generate`] and
/// [`GenerationRequest::modify`], so the prompt is always trimmed and
/// non-empty and `base_code` is present exactly for modify requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    kind: RequestKind,
    prompt: String,
    base_code: Option<String>,
}

impl GenerationRequest {
    /// Create a generate request.
    ///
    /// # Errors
    /// Returns [`RequestError::EmptyPrompt`] if the prompt is blank.
    pub fn generate(prompt: &str) -> Result<Self, RequestError> {
        Ok(Self {
            kind: RequestKind::Generate,
            prompt: normalize_prompt(prompt)?,
            base_code: None,
        })
    }

    /// Create a modify request against `base_code`.
    ///
    /// # Errors
    /// Returns [`RequestError::EmptyPrompt`] if the prompt is blank.
    pub fn modify(prompt: &str, base_code: impl Into<String>) -> Result<Self, RequestError> {
        Ok(Self {
            kind: RequestKind::Modify,
            prompt: normalize_prompt(prompt)?,
            base_code: Some(base_code.into()),
        })
    }

    /// Generate or modify.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The trimmed, non-empty prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Code the modification applies to (modify requests only).
    #[must_use]
    pub fn base_code(&self) -> Option<&str> {
        self.base_code.as_deref()
    }
}

fn normalize_prompt(prompt: &str) -> Result<String, RequestError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(RequestError::EmptyPrompt);
    }
    Ok(trimmed.to_string())
}

/// Where a failed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// The generation service reported the failure itself.
    Service,
    /// Delivery failed: connection, decoding, or a superseded request.
    Transport,
}

/// Outcome of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationResponse {
    /// Scene code returned by the service.
    Success { code: String },
    /// Request failed.
    Failure {
        message: String,
        origin: FailureOrigin,
    },
}

impl GenerationResponse {
    /// Scene code returned by the service.
    #[must_use]
    pub fn success(code: impl Into<String>) -> Self {
        Self::Success { code: code.into() }
    }

    /// Failure reported by the generation service.
    #[must_use]
    pub fn service_failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            origin: FailureOrigin::Service,
        }
    }

    /// Failure of the delivery path.
    #[must_use]
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            origin: FailureOrigin::Transport,
        }
    }

    /// True for [`GenerationResponse::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
