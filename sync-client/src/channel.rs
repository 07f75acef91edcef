//! Client end of the push channel.
//!
//! A single task owns the WebSocket. It publishes the connection state through
//! a `watch` channel, forwards server frames as [`ChannelEvent`]s and writes
//! queued intents in order. Intents are only accepted while connected; the
//! queue is emptied whenever a new connection starts so nothing from an older
//! session leaks into the next one.

use crate::state::ConnectionState;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use transit_types::{ClientEvent, ServerEvent, Vehicle};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("push channel is not connected")]
    NotConnected,
    #[error("push channel is closed")]
    Closed,
    #[error("socket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the store hears from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connect,
    Disconnect,
    Error(String),
    ServerError,
    UpdateVehicles(Vec<Vehicle>),
}

/// Outbound half used by the store. At-most-once: a rejected intent is never
/// retried.
pub trait PushChannel: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError>;

    fn state(&self) -> ConnectionState;
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws://host:port/ws`
    pub url: String,
    pub max_reconnects: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ChannelConfig {
            url: url.into(),
            max_reconnects: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Bounded exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    limit: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, limit: u32) -> Self {
        Backoff {
            initial,
            max,
            limit,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.limit {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        Some(self.initial.saturating_mul(factor).min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Cloneable handle on a running channel task.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<Notify>,
}

impl ChannelHandle {
    /// Stops the connection task. The event stream ends with `Disconnect`.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl PushChannel for ChannelHandle {
    fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        debug!("Emitting {}", event.name());
        self.outbound.send(event).map_err(|_| TransportError::Closed)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Starts the connection task. The returned receiver yields every channel
/// event and ends when the task gives up or is closed.
pub fn open(
    config: ChannelConfig,
) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>, JoinHandle<()>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let shutdown = Arc::new(Notify::new());

    let task = ConnectionTask {
        config,
        outbound: outbound_rx,
        events: events_tx,
        state: state_tx,
        shutdown: shutdown.clone(),
    };
    let join = tokio::spawn(task.run());

    let handle = ChannelHandle {
        outbound: outbound_tx,
        state: state_rx,
        shutdown,
    };
    (handle, events_rx, join)
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    /// Closed locally; do not reconnect.
    Closed,
    Dropped,
    Failed(String),
}

struct ConnectionTask {
    config: ChannelConfig,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    shutdown: Arc<Notify>,
}

impl ConnectionTask {
    fn publish(&self, state: ConnectionState, event: ChannelEvent) {
        let _ = self.state.send(state);
        let _ = self.events.send(event);
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.max_reconnects,
        );

        loop {
            let _ = self.state.send(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = self.shutdown.notified() => {
                    self.publish(ConnectionState::Disconnected, ChannelEvent::Disconnect);
                    return;
                }
                attempt = tokio_tungstenite::connect_async(self.config.url.as_str()) => attempt,
            };

            match attempt {
                Ok((socket, _)) => {
                    info!("Connected to {}", self.config.url);
                    backoff.reset();
                    while self.outbound.try_recv().is_ok() {}
                    self.publish(ConnectionState::Connected, ChannelEvent::Connect);

                    match self.session(socket).await {
                        SessionEnd::Closed => {
                            info!("Push channel closed");
                            self.publish(ConnectionState::Disconnected, ChannelEvent::Disconnect);
                            return;
                        }
                        SessionEnd::Dropped => {
                            warn!("Push channel dropped by the server");
                            self.publish(ConnectionState::Disconnected, ChannelEvent::Disconnect);
                        }
                        SessionEnd::Failed(e) => {
                            warn!("Push channel failed: {e}");
                            self.publish(ConnectionState::Error, ChannelEvent::Error(e));
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not reach {}: {e}", self.config.url);
                    self.publish(ConnectionState::Error, ChannelEvent::Error(e.to_string()));
                }
            }

            let Some(delay) = backoff.next_delay() else {
                warn!("Giving up on {} after {} attempts", self.config.url, self.config.max_reconnects);
                let _ = self.state.send(ConnectionState::Disconnected);
                return;
            };
            debug!("Reconnecting in {delay:?}");
            tokio::select! {
                _ = self.shutdown.notified() => {
                    self.publish(ConnectionState::Disconnected, ChannelEvent::Disconnect);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Closed;
                }
                intent = self.outbound.recv() => {
                    let Some(intent) = intent else {
                        return SessionEnd::Closed;
                    };
                    match intent.to_frame() {
                        Ok(frame) => {
                            if let Err(e) = sink.send(Message::Text(frame)).await {
                                return SessionEnd::Failed(e.to_string());
                            }
                        }
                        Err(e) => warn!("Dropping unencodable {}: {e}", intent.name()),
                    }
                }
                message = stream.next() => match message {
                    None | Some(Ok(Message::Close(_))) => return SessionEnd::Dropped,
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    Some(Ok(Message::Text(text))) => match ServerEvent::from_frame(&text) {
                        Ok(ServerEvent::UpdateVehicles(vehicles)) => {
                            let _ = self.events.send(ChannelEvent::UpdateVehicles(vehicles));
                        }
                        Ok(ServerEvent::ServerError) => {
                            let _ = self.events.send(ChannelEvent::ServerError);
                        }
                        Err(e) => warn!("Ignoring malformed frame: {e}"),
                    },
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 7);
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn backoff_resets_after_success() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn intents_rejected_until_connected() {
        let mut config = ChannelConfig::new("ws://127.0.0.1:1/ws");
        config.max_reconnects = 0;
        let (handle, mut events, join) = open(config);

        let err = handle.emit(ClientEvent::RouteRemoveAll).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        assert!(matches!(events.recv().await, Some(ChannelEvent::Error(_))));
        join.await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(events.recv().await, None);
    }
}
