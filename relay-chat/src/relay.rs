use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::json;
use tokio::{
    net::TcpListener,
    select,
    sync::{Mutex, broadcast, watch},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{config::RelayConfig, frame::Frame};

type ClientId = u64;

/// Fan-out server: every frame received from any client goes to all clients.
pub struct Relay {
    listener: TcpListener,
    router: Router,
    state: Arc<RelayState>,
}

impl Relay {
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind relay to {addr}"))?;
        Self::new(listener, config)
    }

    pub fn new(listener: TcpListener, config: &RelayConfig) -> Result<Self> {
        let state = Arc::new(RelayState::new());
        let router = router(Arc::clone(&state), &config.allowed_origin)?;
        Ok(Self {
            listener,
            router,
            state,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Relay {
            listener,
            router,
            state,
        } = self;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            handle_shutdown(&state);
        })
        .await
        .context("relay server failed")?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn router(state: Arc<RelayState>, allowed_origin: &str) -> Result<Router> {
    let origin = allowed_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid allowed origin '{allowed_origin}'"))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST]);

    Ok(Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn handle_shutdown(state: &RelayState) {
    info!("relay shutting down");
    state.shutdown.send_replace(true);
}

struct RelayState {
    clients: Mutex<HashMap<ClientId, SocketAddr>>,
    broadcaster: broadcast::Sender<Frame>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
}

impl RelayState {
    fn new() -> Self {
        // Receivers that fall further behind than this lose the oldest frames.
        let (broadcaster, _) = broadcast::channel(128);
        let (shutdown, _) = watch::channel(false);
        Self {
            clients: Mutex::new(HashMap::new()),
            broadcaster,
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    async fn register_client(&self, peer: SocketAddr) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().await.insert(id, peer);
        id
    }

    async fn remove_client(&self, id: ClientId) -> Option<SocketAddr> {
        self.clients.lock().await.remove(&id)
    }

    async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    fn broadcast(&self, frame: Frame) {
        if let Err(error) = self.broadcaster.send(frame) {
            warn!(?error, "failed to broadcast frame");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.broadcaster.subscribe()
    }
}

async fn health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count().await,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, peer, state))
}

async fn handle_connection(socket: WebSocket, peer: SocketAddr, state: Arc<RelayState>) {
    // Subscribe before registering so a registered client never misses a frame.
    let inbox = state.subscribe();
    let client_id = state.register_client(peer).await;
    info!(%peer, client_id, "client connected");

    if let Err(err) = run_client_session(&state, socket, inbox).await {
        debug!(%peer, error = ?err, "client connection closed with error");
    }

    cleanup_client_disconnect(&state, client_id).await;
}

async fn run_client_session(
    state: &RelayState,
    socket: WebSocket,
    mut inbox: broadcast::Receiver<Frame>,
) -> Result<()> {
    let mut shutdown = state.shutdown.subscribe();
    if *shutdown.borrow() {
        return Ok(());
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        select! {
            client_message = receiver.next() => {
                if !handle_client_message(client_message, state)? {
                    break;
                }
            }
            broadcast_frame = inbox.recv() => {
                if !handle_broadcast_frame(broadcast_frame, &mut sender).await {
                    break;
                }
            }
            _ = shutdown.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

fn handle_client_message(
    message: Option<Result<Message, axum::Error>>,
    state: &RelayState,
) -> Result<bool> {
    match message {
        Some(Ok(Message::Text(text))) => {
            relay_text(&text, state);
            Ok(true)
        }
        Some(Ok(Message::Binary(bytes))) => {
            match std::str::from_utf8(&bytes) {
                Ok(text) => relay_text(text, state),
                Err(err) => debug!(?err, "dropping non-utf8 binary message"),
            }
            Ok(true)
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(true),
        Some(Ok(Message::Close(_))) | None => Ok(false),
        Some(Err(err)) => Err(err.into()),
    }
}

fn relay_text(text: &str, state: &RelayState) {
    // Only the envelope is checked; the payload goes out exactly as received.
    match Frame::decode(text) {
        Ok(frame) => {
            debug!(channel = %frame.channel, "relaying frame");
            state.broadcast(frame);
        }
        Err(err) => debug!(?err, "dropping message without a routable channel"),
    }
}

async fn handle_broadcast_frame(
    frame: Result<Frame, broadcast::error::RecvError>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match frame {
        Ok(frame) => {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(err) => {
                    warn!(?err, "failed to encode frame");
                    return true;
                }
            };
            if let Err(err) = sender.send(Message::Text(text)).await {
                debug!(?err, "failed to deliver frame to client");
                return false;
            }
            true
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "client fell behind the relay; frames dropped");
            true
        }
        Err(broadcast::error::RecvError::Closed) => false,
    }
}

async fn cleanup_client_disconnect(state: &RelayState, client_id: ClientId) {
    if let Some(peer) = state.remove_client(client_id).await {
        info!(%peer, client_id, "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Channel, ChatEvent};

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn registry_tracks_connects_and_disconnects() {
        let state = RelayState::new();
        let alice = state.register_client(peer(4001)).await;
        let bob = state.register_client(peer(4002)).await;
        assert_ne!(alice, bob);
        assert_eq!(state.client_count().await, 2);

        assert_eq!(state.remove_client(alice).await, Some(peer(4001)));
        assert_eq!(state.remove_client(alice).await, None);
        assert_eq!(state.client_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_delivers_same_frame_to_every_subscriber() {
        let state = RelayState::new();
        let mut rx_one = state.subscribe();
        let mut rx_two = state.subscribe();

        let frame = Frame::new(Channel::Message, &ChatEvent::join("alice")).expect("frame");
        state.broadcast(frame.clone());

        let first = rx_one.recv().await.expect("first receiver");
        let second = rx_two.recv().await.expect("second receiver");
        assert_eq!(first, frame);
        assert_eq!(first, second);
    }

    #[test]
    fn unroutable_text_is_not_broadcast() {
        let state = RelayState::new();
        let mut rx = state.subscribe();

        relay_text("{\"nope\":true}", &state);
        relay_text(r#"{"channel":"message","payload":42}"#, &state);

        let relayed = rx.try_recv().expect("garbage payload still relayed");
        assert_eq!(relayed.payload.get(), "42");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejects_invalid_origin() {
        let state = Arc::new(RelayState::new());
        assert!(router(state, "bad\norigin").is_err());
    }
}
