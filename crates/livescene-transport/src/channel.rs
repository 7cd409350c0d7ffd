//! Dual-transport generation channel.
//!
//! A supervisor task keeps one WebSocket open, reconnecting per the
//! configured [`ReconnectPolicy`] after every closure. `submit` goes over the
//! socket while it is open and over the HTTP fallback otherwise; callers see
//! the same [`GenerationResponse`] either way.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use livescene_core::{
    ChannelState, GenerationRequest, GenerationResponse, GenerationTransport, RequestKind,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::{
    config::{ChannelConfig, ReconnectPolicy},
    fallback::{HttpFallback, transport_failure_message},
    protocol::{InboundMessage, OutboundMessage},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The request currently waiting on the persistent channel.
struct Pending {
    id: u64,
    kind: RequestKind,
    tx: oneshot::Sender<GenerationResponse>,
}

impl Pending {
    fn resolve(self, response: GenerationResponse) {
        // The submitter may have timed out and gone away.
        let _ = self.tx.send(response);
    }

    fn fail(self) {
        let message = transport_failure_message(self.kind);
        self.resolve(GenerationResponse::transport_failure(message));
    }
}

/// A serialized request on its way to the supervisor.
///
/// The frame travels with its [`Pending`], so a frame that is never written
/// still resolves its submitter.
struct Outbound {
    frame: String,
    pending: Pending,
}

/// Single outstanding-request slot.
#[derive(Default)]
struct PendingSlot(Mutex<Option<Pending>>);

impl PendingSlot {
    fn replace(&self, pending: Pending) -> Option<Pending> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pending)
    }

    /// Take the pending request a response belongs to.
    ///
    /// Responses without an id belong to whatever is pending.
    fn take_for(&self, id: Option<u64>) -> Option<Pending> {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match (id, slot.as_ref()) {
            (Some(id), Some(pending)) if pending.id != id => None,
            _ => slot.take(),
        }
    }

    fn take_if(&self, id: u64) -> Option<Pending> {
        self.take_for(Some(id))
    }

    fn is_empty(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Generation channel with a persistent WebSocket and HTTP fallback.
pub struct DualChannel {
    state_rx: watch::Receiver<ChannelState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Arc<PendingSlot>,
    next_id: AtomicU64,
    fallback: HttpFallback,
    request_timeout: Option<Duration>,
    supervisor: JoinHandle<()>,
}

impl DualChannel {
    /// Start the channel. Must be called within a tokio runtime.
    #[must_use]
    pub fn connect(config: ChannelConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingSlot::default());

        let supervisor = tokio::spawn(supervise(
            config.ws_url.clone(),
            config.reconnect.clone(),
            state_tx,
            outbound_rx,
            Arc::clone(&pending),
        ));

        Self {
            state_rx,
            outbound,
            pending,
            next_id: AtomicU64::new(0),
            fallback: HttpFallback::new(config.http_base_url.clone()),
            request_timeout: config.request_timeout(),
            supervisor,
        }
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Whether the supervisor is still maintaining the persistent channel.
    ///
    /// `false` once the reconnect policy has given up.
    #[must_use]
    pub fn is_supervising(&self) -> bool {
        !self.supervisor.is_finished()
    }

    /// Wait until the channel reaches `state`.
    pub async fn wait_for(&self, state: ChannelState) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    async fn submit_persistent(&self, request: GenerationRequest) -> GenerationResponse {
        let kind = request.kind();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = match serde_json::to_string(&OutboundMessage::from_request(&request, id)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to serialize request: {e}");
                return GenerationResponse::transport_failure(transport_failure_message(kind));
            }
        };

        let (tx, rx) = oneshot::channel();
        let outbound = Outbound {
            frame,
            pending: Pending { id, kind, tx },
        };
        if self.outbound.send(outbound).is_err() {
            tracing::warn!("Persistent channel gone, using fallback");
            return self.fallback.submit(&request).await;
        }
        tracing::debug!(request_id = id, ?kind, "Submitted over persistent channel");

        let received = match self.request_timeout {
            Some(limit) => {
                if let Ok(received) = tokio::time::timeout(limit, rx).await {
                    received
                } else {
                    tracing::warn!(request_id = id, "Request timed out");
                    self.pending.take_if(id);
                    return GenerationResponse::transport_failure(transport_failure_message(kind));
                }
            }
            None => rx.await,
        };

        received.unwrap_or_else(|_| {
            GenerationResponse::transport_failure(transport_failure_message(kind))
        })
    }
}

impl Drop for DualChannel {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[async_trait]
impl GenerationTransport for DualChannel {
    async fn submit(&self, request: GenerationRequest) -> GenerationResponse {
        if self.state() == ChannelState::Open {
            self.submit_persistent(request).await
        } else {
            self.fallback.submit(&request).await
        }
    }

    fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }
}

async fn supervise(
    url: String,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ChannelState>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    pending: Arc<PendingSlot>,
) {
    let mut attempt = 0u32;
    loop {
        state_tx.send_replace(ChannelState::Connecting);
        tracing::info!(%url, "Connecting persistent channel");

        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                attempt = 0;
                state_tx.send_replace(ChannelState::Open);
                tracing::info!(%url, "Persistent channel established");
                let sender_alive = run_connection(socket, &mut outbound_rx, &pending).await;
                if !sender_alive {
                    state_tx.send_replace(ChannelState::Closed);
                    return;
                }
                tracing::info!(%url, "Persistent channel closed");
            }
            Err(e) => {
                tracing::warn!(%url, "Persistent channel error, requests will use fallback: {e}");
            }
        }

        state_tx.send_replace(ChannelState::Closed);
        fail_stranded(&mut outbound_rx, &pending);

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.delay_for(attempt) else {
            tracing::warn!(attempt, "Giving up on persistent channel");
            return;
        };
        tokio::time::sleep(delay).await;
    }
}

/// Fail every request the closed connection can no longer answer.
///
/// Only the supervisor fills the pending slot, so once the queue is drained
/// nothing can land in the slot behind this.
fn fail_stranded(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>, pending: &PendingSlot) {
    while let Ok(unsent) = outbound_rx.try_recv() {
        tracing::debug!(request_id = unsent.pending.id, "Dropping unsent request");
        unsent.pending.fail();
    }
    if let Some(stranded) = pending.take_for(None) {
        stranded.fail();
    }
}

/// Pump one open socket. Returns `false` if the channel handle was dropped.
async fn run_connection(
    socket: Socket,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    pending: &PendingSlot,
) -> bool {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(Outbound { frame, pending: waiting }) = outbound else {
                    let _ = sink.close().await;
                    return false;
                };
                let id = waiting.id;
                if let Some(previous) = pending.replace(waiting) {
                    tracing::warn!(superseded = previous.id, request_id = id, "Request superseded");
                    previous.fail();
                }
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::error!("Persistent channel send failed: {e}");
                    return true;
                }
            }
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_inbound(&text, pending),
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            handle_inbound(text, pending);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return true,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("Persistent channel error: {e}");
                        return true;
                    }
                }
            }
        }
    }
}

fn handle_inbound(text: &str, pending: &PendingSlot) {
    let msg: InboundMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Invalid service message: {e}");
            if let Some(waiting) = pending.take_for(None) {
                waiting.fail();
            }
            return;
        }
    };

    if let InboundMessage::Code {
        plan: Some(plan), ..
    } = &msg
    {
        tracing::debug!(%plan, "Service plan");
    }

    let request_id = msg.request_id();
    match pending.take_for(request_id) {
        Some(waiting) => {
            tracing::debug!(request_id = waiting.id, "Response received");
            waiting.resolve(msg.into_response());
        }
        None if pending.is_empty() => {
            tracing::debug!(?request_id, "Discarding unsolicited response");
        }
        None => tracing::debug!(?request_id, "Discarding stale response"),
    }
}
