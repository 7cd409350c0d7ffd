//! Generation service router: the server half of the protocol.
//!
//! Serves `/ws`, `/generate`, and `/modify` over any [`SceneGenerator`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use livescene_core::{GeneratorError, SceneGenerator};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::protocol::{FallbackBody, FallbackReply, InboundMessage, OutboundMessage};

/// Router state.
pub struct ServiceState<G> {
    /// The generator answering requests.
    pub generator: Arc<G>,
}

impl<G> Clone for ServiceState<G> {
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
        }
    }
}

/// Create the generation service router.
///
/// # Example
/// ```ignore
/// let app = create_service_router(Arc::new(MyGenerator));
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn create_service_router<G>(generator: Arc<G>) -> Router
where
    G: SceneGenerator + 'static,
{
    Router::new()
        .route("/ws", get(ws_handler::<G>))
        .route("/generate", post(generate_handler::<G>))
        .route("/modify", post(modify_handler::<G>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ServiceState { generator })
}

fn reply(result: Result<String, GeneratorError>) -> (StatusCode, Json<FallbackReply>) {
    match result {
        Ok(code) => (StatusCode::OK, Json(FallbackReply::code(code))),
        Err(GeneratorError::EmptyPrompt) => (
            StatusCode::BAD_REQUEST,
            Json(FallbackReply::error(GeneratorError::EmptyPrompt.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FallbackReply::error(e.to_string())),
        ),
    }
}

async fn generate_handler<G>(
    State(state): State<ServiceState<G>>,
    Json(body): Json<FallbackBody>,
) -> impl IntoResponse
where
    G: SceneGenerator + 'static,
{
    if body.prompt.trim().is_empty() {
        return reply(Err(GeneratorError::EmptyPrompt));
    }
    reply(state.generator.generate(&body.prompt).await)
}

async fn modify_handler<G>(
    State(state): State<ServiceState<G>>,
    Json(body): Json<FallbackBody>,
) -> impl IntoResponse
where
    G: SceneGenerator + 'static,
{
    if body.prompt.trim().is_empty() {
        return reply(Err(GeneratorError::EmptyPrompt));
    }
    let original = body.original_code.unwrap_or_default();
    reply(state.generator.modify(&body.prompt, &original).await)
}

/// WebSocket upgrade handler.
pub async fn ws_handler<G>(
    ws: WebSocketUpgrade,
    State(state): State<ServiceState<G>>,
) -> impl IntoResponse
where
    G: SceneGenerator + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<G>(socket: WebSocket, state: ServiceState<G>)
where
    G: SceneGenerator + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let command: OutboundMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(InboundMessage::Error {
                    message: format!("Invalid message: {e}"),
                    request_id: None,
                });
                continue;
            }
        };

        let request_id = command.request_id();
        let result = match &command {
            OutboundMessage::Generate { prompt, .. } if !prompt.trim().is_empty() => {
                state.generator.generate(prompt).await
            }
            OutboundMessage::Modify {
                prompt,
                original_code,
                ..
            } if !prompt.trim().is_empty() => state.generator.modify(prompt, original_code).await,
            _ => Err(GeneratorError::EmptyPrompt),
        };

        let response = match result {
            Ok(code) => InboundMessage::Code {
                code,
                plan: None,
                request_id,
            },
            Err(e) => InboundMessage::Error {
                message: e.to_string(),
                request_id,
            },
        };
        if tx.send(response).is_err() {
            break;
        }
    }

    send_task.abort();
}
