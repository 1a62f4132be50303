//! WebSocket Server
//!
//! Async WebSocket front end for the progression engine. Each connection
//! gets a reader loop and a writer task; requests are handled in order
//! per connection and a session silent for `idle_timeout` is closed. A
//! background loop sweeps expired rate-limit rows and checkpoints the
//! snapshot.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{parse_var, ConfigError};
use crate::core::ids::PlayerId;
use crate::engine::ProgressionEngine;
use crate::network::handler::{Connection, RequestHandler};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Interval between sweeps of expired counters and old violations.
    pub sweep_interval: Duration,
    /// Connections silent for longer than this are dropped.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = parse_var::<SocketAddr>("BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var::<usize>("MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(secs) = parse_var::<u64>("SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}

/// Listener failures.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Socket setup failed.
    #[error("listener I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure below the request layer.
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state. The entry lives exactly as long as its session task.
struct ConnectedClient {
    /// Player identifier (after auth).
    player: Option<PlayerId>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The progression server.
pub struct ProgressionServer {
    config: ServerConfig,
    handler: RequestHandler,
    clients: Clients,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProgressionServer {
    /// Create a new server around `handler`.
    pub fn new(config: ServerConfig, handler: RequestHandler) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServeError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServeError> {
        info!("Progression server listening on {}", listener.local_addr()?);

        let maintenance = tokio::spawn(Self::run_maintenance_loop(
            self.handler.engine().clone(),
            self.config.sweep_interval,
        ));

        let mut stop = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if self.connection_count().await >= self.config.max_connections {
                                warn!(%peer, "At capacity, turning connection away");
                                tokio::spawn(Self::turn_away(stream, peer));
                                continue;
                            }
                            debug!(%peer, "Accepted connection");
                            self.spawn_session(stream, peer);
                        }
                        Err(e) => warn!("accept() failed: {}", e),
                    }
                }
                _ = stop.recv() => break,
            }
        }

        info!("Listener stopped");
        maintenance.abort();
        Ok(())
    }

    /// Run one client session on its own task.
    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let clients = self.clients.clone();
        let handler = self.handler.clone();
        let mut stop = self.shutdown_tx.subscribe();
        let idle_timeout = self.config.idle_timeout;

        tokio::spawn(async move {
            let (sink, mut frames) = match accept_async(stream).await {
                Ok(ws) => ws.split(),
                Err(e) => {
                    warn!(%peer, "Handshake rejected: {}", e);
                    return;
                }
            };

            clients.write().await.insert(peer, ConnectedClient { player: None });

            let (outbox, inbox) = mpsc::channel::<ServerMessage>(64);
            let writer = tokio::spawn(Self::write_replies(sink, inbox));
            let mut conn = Connection::new(peer);

            loop {
                let frame = tokio::select! {
                    frame = tokio::time::timeout(idle_timeout, frames.next()) => match frame {
                        Ok(frame) => frame,
                        Err(_) => {
                            debug!(%peer, "Closing idle session");
                            break;
                        }
                    },
                    _ = stop.recv() => {
                        let _ = outbox
                            .send(ServerMessage::Shutdown { reason: "Server going down for maintenance".into() })
                            .await;
                        break;
                    }
                };

                let reply = match frame {
                    Some(Ok(Message::Text(text))) => Self::reply_to_text(&handler, &mut conn, &text).await,
                    Some(Ok(Message::Binary(data))) => handler.handle_binary(&mut conn, &data).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(%peer, "Socket error: {}", e);
                        break;
                    }
                };

                if let Some(client) = clients.write().await.get_mut(&peer) {
                    client.player = conn.identity.map(|i| i.player);
                }

                if outbox.send(reply).await.is_err() {
                    break;
                }
            }

            // Let queued replies flush before tearing down the writer
            drop(outbox);
            let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;

            let left = clients.write().await.remove(&peer);
            match left.and_then(|c| c.player) {
                Some(player) => info!(%peer, player = %player.short(), "Session closed"),
                None => debug!(%peer, "Anonymous session closed"),
            }
        });
    }

    async fn reply_to_text(handler: &RequestHandler, conn: &mut Connection, text: &str) -> ServerMessage {
        match ClientMessage::from_json(text) {
            Ok(request) => handler.handle(conn, request).await,
            Err(e) => {
                debug!(peer = %conn.peer, "Unparseable request: {}", e);
                ServerMessage::Error(ServerError::new(ErrorCode::InvalidInput, "Invalid message format"))
            }
        }
    }

    async fn write_replies(mut sink: WsSink, mut inbox: mpsc::Receiver<ServerMessage>) {
        while let Some(reply) = inbox.recv().await {
            match reply.to_json() {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
                Err(e) => error!("Dropping unserializable reply: {}", e),
            }
        }
        let _ = sink.close().await;
    }

    /// Finish the handshake only to say the server is full, then close.
    async fn turn_away(stream: TcpStream, peer: SocketAddr) {
        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%peer, "Handshake rejected: {}", e);
                return;
            }
        };
        let reply = ServerMessage::Error(ServerError::new(ErrorCode::ServerOverloaded, "Too many connections"));
        if let Ok(json) = reply.to_json() {
            let _ = ws.send(Message::Text(json)).await;
        }
        let _ = ws.close(None).await;
    }

    /// Periodic sweep and snapshot checkpoint.
    async fn run_maintenance_loop(engine: Arc<ProgressionEngine>, sweep_interval: Duration) {
        let mut interval = interval(sweep_interval);
        // First tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            match engine.sweep().await {
                Ok(report) => {
                    if report.counters_removed + report.violations_removed > 0 {
                        info!(
                            "Sweep removed {} counter(s), {} violation(s)",
                            report.counters_removed, report.violations_removed
                        );
                    }
                }
                Err(e) => error!("Sweep failed: {}", e),
            }

            if let Some(path) = engine.config().state_path.as_deref() {
                if let Err(e) = engine.save_snapshot(path).await {
                    warn!("Snapshot checkpoint failed: {}", e);
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
