use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::StreamExt;
use livescene_core::{
    ChannelState, FailureOrigin, GenerationRequest, GenerationResponse, GenerationTransport,
    GeneratorError, SceneGenerator,
};
use livescene_transport::{
    ChannelConfig, DualChannel, ReconnectPolicy, service::create_service_router,
};
use tokio::net::TcpListener;

struct EchoGenerator;

#[async_trait]
impl SceneGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        if prompt == "fail" {
            return Err(GeneratorError::Failed("model unavailable".to_string()));
        }
        Ok(format!("// {prompt}\nscene = new_scene();"))
    }

    async fn modify(&self, prompt: &str, original_code: &str) -> Result<String, GeneratorError> {
        Ok(format!("{original_code}\n// {prompt}"))
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn config(ws: SocketAddr, http: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        ws_url: format!("ws://{ws}/ws"),
        http_base_url: format!("http://{http}"),
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(20)),
        request_timeout_ms: Some(5_000),
    }
}

async fn open_channel(addr: SocketAddr) -> DualChannel {
    let channel = DualChannel::connect(config(addr, addr));
    tokio::time::timeout(Duration::from_secs(5), channel.wait_for(ChannelState::Open))
        .await
        .expect("channel never opened");
    channel
}

/// Channel whose socket can never connect, so every call falls back to HTTP.
async fn fallback_channel(http: SocketAddr) -> DualChannel {
    let channel = DualChannel::connect(config(unused_addr().await, http));
    assert_ne!(channel.state(), ChannelState::Open);
    channel
}

#[tokio::test]
async fn test_fallback_used_while_socket_unreachable() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let channel = fallback_channel(addr).await;

    let response = channel
        .submit(GenerationRequest::generate("a red cube").unwrap())
        .await;
    assert_eq!(
        response,
        GenerationResponse::success("// a red cube\nscene = new_scene();")
    );
}

#[tokio::test]
async fn test_both_paths_give_identical_responses() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let persistent = open_channel(addr).await;
    let fallback = fallback_channel(addr).await;

    let requests = [
        GenerationRequest::generate("a red cube").unwrap(),
        GenerationRequest::generate("fail").unwrap(),
        GenerationRequest::modify("make it blue", "scene = new_scene();").unwrap(),
    ];
    for request in requests {
        let over_socket = persistent.submit(request.clone()).await;
        let over_http = fallback.submit(request).await;
        assert_eq!(over_socket, over_http);
    }
    assert_eq!(persistent.state(), ChannelState::Open);
}

#[tokio::test]
async fn test_modify_sends_original_code() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let channel = open_channel(addr).await;

    let response = channel
        .submit(GenerationRequest::modify("make it blue", "let cube = 1;").unwrap())
        .await;
    assert_eq!(
        response,
        GenerationResponse::success("let cube = 1;\n// make it blue")
    );
}

#[tokio::test]
async fn test_service_failure_is_verbatim() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let channel = fallback_channel(addr).await;

    let response = channel
        .submit(GenerationRequest::generate("fail").unwrap())
        .await;
    assert_eq!(
        response,
        GenerationResponse::Failure {
            message: "model unavailable".to_string(),
            origin: FailureOrigin::Service,
        }
    );
}

#[tokio::test]
async fn test_unreachable_service_is_transport_failure() {
    let dead = unused_addr().await;
    let channel = DualChannel::connect(config(dead, dead));

    let response = channel
        .submit(GenerationRequest::generate("a red cube").unwrap())
        .await;
    assert_eq!(
        response,
        GenerationResponse::transport_failure(
            "An error occurred while generating the scene. Please try again."
        )
    );
}

#[tokio::test]
async fn test_empty_prompt_rejected_by_service() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate"))
        .json(&serde_json::json!({"prompt": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No prompt provided");
}

#[tokio::test]
async fn test_reconnects_after_every_closure() {
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Accept, then drop the socket straight away.
                ws.on_upgrade(|_socket| async {}).into_response()
            }
        }),
    );
    let addr = serve(app).await;
    let _channel = DualChannel::connect(config(addr, addr));

    tokio::time::timeout(Duration::from_secs(5), async {
        while connections.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("channel did not keep reconnecting");
}

#[tokio::test]
async fn test_closure_fails_outstanding_request() {
    let app = Router::new().route(
        "/ws",
        get(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                // Read the request, then hang up without answering.
                while let Some(Ok(msg)) = socket.next().await {
                    if matches!(msg, Message::Text(_)) {
                        break;
                    }
                }
            })
        }),
    );
    let addr = serve(app).await;
    let channel = open_channel(addr).await;

    let response = channel
        .submit(GenerationRequest::generate("a red cube").unwrap())
        .await;
    assert!(matches!(
        response,
        GenerationResponse::Failure {
            origin: FailureOrigin::Transport,
            ..
        }
    ));
}

#[tokio::test]
async fn test_gives_up_then_uses_fallback() {
    let addr = serve(create_service_router(Arc::new(EchoGenerator))).await;
    let mut config = config(unused_addr().await, addr);
    config.reconnect = ReconnectPolicy {
        delay_ms: 10,
        max_attempts: Some(2),
        ..ReconnectPolicy::default()
    };
    let channel = DualChannel::connect(config);

    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.is_supervising() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("supervisor never gave up");
    assert_eq!(channel.state(), ChannelState::Closed);

    let response = channel
        .submit(GenerationRequest::generate("a red cube").unwrap())
        .await;
    assert_eq!(
        response,
        GenerationResponse::success("// a red cube\nscene = new_scene();")
    );
}
