//! Wire protocol for the persistent channel and the fallback endpoints.

use livescene_core::{GenerationRequest, GenerationResponse, RequestKind};
use serde::{Deserialize, Serialize};

/// Message from client to service over the persistent channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Generate a new scene.
    #[serde(rename_all = "camelCase")]
    Generate {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Modify an existing scene.
    #[serde(rename_all = "camelCase")]
    Modify {
        prompt: String,
        original_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

impl OutboundMessage {
    /// Build the message for a request, tagged with `request_id`.
    #[must_use]
    pub fn from_request(request: &GenerationRequest, request_id: u64) -> Self {
        match request.kind() {
            RequestKind::Generate => Self::Generate {
                prompt: request.prompt().to_string(),
                request_id: Some(request_id),
            },
            RequestKind::Modify => Self::Modify {
                prompt: request.prompt().to_string(),
                original_code: request.base_code().unwrap_or_default().to_string(),
                request_id: Some(request_id),
            },
        }
    }

    /// Id the request is tagged with.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::Generate { request_id, .. } | Self::Modify { request_id, .. } => *request_id,
        }
    }
}

/// Message from service to client over the persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Generated scene code.
    #[serde(rename_all = "camelCase")]
    Code {
        code: String,
        /// Planner output, when the service ran one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Generation failed.
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

impl InboundMessage {
    /// Id of the request this answers, if the service echoed it.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::Code { request_id, .. } | Self::Error { request_id, .. } => *request_id,
        }
    }

    /// Convert to the transport-independent response.
    #[must_use]
    pub fn into_response(self) -> GenerationResponse {
        match self {
            Self::Code { code, .. } => GenerationResponse::success(code),
            Self::Error { message, .. } => GenerationResponse::service_failure(message),
        }
    }
}

/// Request body for `POST /generate` and `POST /modify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_code: Option<String>,
}

impl From<&GenerationRequest> for FallbackBody {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            prompt: request.prompt().to_string(),
            original_code: request.base_code().map(str::to_string),
        }
    }
}

/// Response body of the fallback endpoints: either `code` or `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FallbackReply {
    /// Successful reply body.
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            error: None,
        }
    }

    /// Error reply body.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            code: None,
            error: Some(error.into()),
        }
    }

    /// Interpret the reply. An `error` wins over `code`; neither is `None`.
    #[must_use]
    pub fn into_response(self) -> Option<GenerationResponse> {
        match (self.code, self.error) {
            (_, Some(error)) => Some(GenerationResponse::service_failure(error)),
            (Some(code), None) => Some(GenerationResponse::success(code)),
            (None, None) => None,
        }
    }
}

/// Fallback endpoint path for a request kind.
#[must_use]
pub const fn fallback_path(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Generate => "/generate",
        RequestKind::Modify => "/modify",
    }
}
