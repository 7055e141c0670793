//! Device Connection Client
//!
//! Owns the live WebSocket session with an instrumented process: connects,
//! decodes the inbound frame stream on a dedicated task, delivers messages
//! to registered listeners in arrival order, and reports lifecycle changes.
//!
//! One client manages at most one session. Reconnection is never automatic;
//! a dropped connection leaves the client [`Disconnected`] and requires an
//! explicit new [`connect`](InspectorClient::connect).
//!
//! [`Disconnected`]: ConnectionState::Disconnected

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::{ClientListener, ListenerSet, MessageListener};
use crate::protocol::{self, DecodeError};

/// Upper bound on how long a connect attempt may take before it is
/// abandoned, unless overridden via
/// [`with_connect_timeout`](InspectorClient::with_connect_timeout).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Errors establishing a session.
///
/// Connection-level failures terminate only the attempted connection; the
/// client is left [`ConnectionState::Disconnected`] and may retry.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint address '{0}'")]
    InvalidAddress(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

struct Session {
    shutdown: Arc<Notify>,
    reader: tokio::task::JoinHandle<()>,
}

/// Client for the message stream of one instrumented process.
pub struct InspectorClient {
    connect_timeout: Duration,
    state: Arc<Mutex<ConnectionState>>,
    session: tokio::sync::Mutex<Option<Session>>,
    client_listeners: Arc<ListenerSet<dyn ClientListener>>,
    message_listeners: Arc<ListenerSet<dyn MessageListener>>,
}

impl Default for InspectorClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InspectorClient {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a client with a custom connect upper bound.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            session: tokio::sync::Mutex::new(None),
            client_listeners: Arc::new(ListenerSet::new()),
            message_listeners: Arc::new(ListenerSet::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Establish a session with `address` (`host:port`, as produced by a
    /// bridge resolver).
    ///
    /// Completes only once the WebSocket handshake has succeeded or
    /// definitively failed; the attempt is bounded by the configured connect
    /// timeout (10 s by default). On success the client is
    /// [`ConnectionState::Connected`], the frame-reception task is running,
    /// and every client listener has been told `on_connected`.
    ///
    /// Calling `connect` while a session is active first closes that session
    /// completely (its `on_disconnected` fires before the new attempt), so
    /// stray frames from a dying connection can never reach listeners wired
    /// to the new one. Concurrent `connect` calls are serialized.
    pub async fn connect(&self, address: &str) -> Result<(), ClientError> {
        let url = endpoint_url(address)?;

        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            debug!("closing previous session before reconnect");
            shutdown_session(previous).await;
        }

        self.set_state(ConnectionState::Connecting);
        info!("connecting to {}", url);

        let handshake =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await;
        let stream = match handshake {
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Timeout(self.connect_timeout));
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::ConnectionFailed(e.to_string()));
            }
            Ok(Ok((stream, _response))) => stream,
        };

        self.set_state(ConnectionState::Connected);
        let shutdown = Arc::new(Notify::new());
        let reader = tokio::spawn(run_session(
            stream,
            shutdown.clone(),
            self.state.clone(),
            self.client_listeners.clone(),
            self.message_listeners.clone(),
        ));
        *session = Some(Session { shutdown, reader });

        info!("connected to {}", address);
        self.client_listeners.notify(|l| l.on_connected());
        Ok(())
    }

    /// Tear down the active session, if any.
    ///
    /// Always safe to call: on an idle client this is a no-op and fires
    /// nothing. Otherwise it unblocks the frame-reception task, releases the
    /// socket, and returns once `on_disconnected` has been delivered.
    /// `on_disconnected` fires exactly once per successful connect, whether
    /// the session ended here or the remote side dropped it first.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.take() {
            shutdown_session(active).await;
        }
    }

    pub fn register_client_listener(&self, listener: &Arc<dyn ClientListener>) {
        self.client_listeners.register(listener);
    }

    pub fn unregister_client_listener(&self, listener: &Arc<dyn ClientListener>) {
        self.client_listeners.unregister(listener);
    }

    pub fn register_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.message_listeners.register(listener);
    }

    pub fn unregister_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.message_listeners.unregister(listener);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Validate `host:port` and derive the session URL.
fn endpoint_url(address: &str) -> Result<String, ClientError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ClientError::InvalidAddress(address.to_string()))?;
    if host.is_empty() || host.contains(['/', ' ', '@']) || port.parse::<u16>().is_err() {
        return Err(ClientError::InvalidAddress(address.to_string()));
    }
    Ok(format!("ws://{address}"))
}

async fn shutdown_session(session: Session) {
    session.shutdown.notify_one();
    if let Err(e) = session.reader.await {
        warn!("session task did not shut down cleanly: {}", e);
    }
}

/// Frame-reception loop, one spawned task per session.
///
/// Runs until the peer closes, the stream errors, or a shutdown is
/// requested. Always leaves the state `Disconnected` and delivers
/// `on_disconnected` on the way out.
async fn run_session(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shutdown: Arc<Notify>,
    state: Arc<Mutex<ConnectionState>>,
    client_listeners: Arc<ListenerSet<dyn ClientListener>>,
    message_listeners: Arc<ListenerSet<dyn MessageListener>>,
) {
    loop {
        tokio::select! {
            () = shutdown.notified() => {
                debug!("session close requested");
                if let Err(e) = stream.close(None).await {
                    debug!("close handshake failed: {}", e);
                }
                break;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        deliver_frame(&text, &message_listeners);
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => deliver_frame(&text, &message_listeners),
                        Err(_) => warn!("dropping frame: {}", DecodeError::NotText),
                    },
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Handled by the protocol layer
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("server closed the session");
                        break;
                    }
                    Some(Ok(WsMessage::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => {
                        error!("session stream error: {}", e);
                        break;
                    }
                    None => {
                        debug!("session stream ended");
                        break;
                    }
                }
            }
        }
    }

    *state.lock().unwrap() = ConnectionState::Disconnected;
    client_listeners.notify(|l| l.on_disconnected());
}

/// Decode one frame and fan it out in arrival order.
///
/// Decode failures drop the frame and report it; the session continues.
fn deliver_frame(text: &str, listeners: &ListenerSet<dyn MessageListener>) {
    match protocol::decode_frame(text) {
        Ok(message) => {
            let message = Arc::new(message);
            debug!(
                message_id = %message.message_id,
                control = message.is_control(),
                "frame received"
            );
            listeners.notify(|l| l.on_message(Arc::clone(&message)));
        }
        Err(e) => {
            warn!("dropping undecodable frame: {}", e);
        }
    }
}
