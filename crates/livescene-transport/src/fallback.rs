//! One-shot HTTP request/response delivery.

use livescene_core::{GenerationRequest, GenerationResponse, RequestKind};

use crate::protocol::{FallbackBody, FallbackReply, fallback_path};

/// Generic message for delivery failures; details go to the log.
#[must_use]
pub const fn transport_failure_message(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Generate => {
            "An error occurred while generating the scene. Please try again."
        }
        RequestKind::Modify => "An error occurred. Please try again.",
    }
}

/// HTTP fallback client.
#[derive(Debug, Clone)]
pub struct HttpFallback {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFallback {
    /// Create a fallback client for the service at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a fallback client that reuses `client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, kind: RequestKind) -> String {
        format!("{}{}", self.base_url, fallback_path(kind))
    }

    /// Deliver a request. Network and decoding errors become transport failures.
    pub async fn submit(&self, request: &GenerationRequest) -> GenerationResponse {
        let kind = request.kind();
        let url = self.url(kind);
        tracing::debug!(%url, "Submitting over HTTP fallback");

        let response = match self
            .client
            .post(&url)
            .json(&FallbackBody::from(request))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(%url, "Fallback request failed: {e}");
                return GenerationResponse::transport_failure(transport_failure_message(kind));
            }
        };

        // Error statuses still carry a `{error}` body worth showing.
        let status = response.status();
        match response.json::<FallbackReply>().await {
            Ok(reply) => reply.into_response().unwrap_or_else(|| {
                tracing::error!(%url, %status, "Fallback reply has neither code nor error");
                GenerationResponse::transport_failure(transport_failure_message(kind))
            }),
            Err(e) => {
                tracing::error!(%url, %status, "Invalid fallback reply: {e}");
                GenerationResponse::transport_failure(transport_failure_message(kind))
            }
        }
    }
}
