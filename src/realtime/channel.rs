//! Session-scoped realtime channel over a websocket.
//!
//! [`GameChannel`] owns the connection lifecycle and dispatches decoded
//! frames to registered listeners while performing bounded automatic
//! reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::realtime::dispatch::{
    dispatch_event, EventHandler, ListenerId, ListenerRegistry, Subscription,
};
use crate::realtime::proto::{ChannelEvent, EventKind};
use crate::reconnect::ReconnectPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle state of the channel's underlying transport.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LinkState {
    /// Before the first `connect()` or after an explicit `disconnect()`.
    #[default]
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is open; `send` transmits.
    Open,
    /// The transport was lost; a reconnect may be scheduled.
    Closed,
}

/// Errors surfaced by [`GameChannel`].
///
/// Everything past the initial argument check is handled internally: the
/// channel reports transport trouble through the `Connected`/`Disconnected`
/// events and structured logs, never through a `Result`.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// The channel was built with an empty session key.
    #[error("session key must not be empty")]
    EmptySessionKey,
}

/// Realtime channel for one game session.
///
/// The channel owns a single logical connection addressed as
/// `<endpoint>/<session_key>`. Inbound frames are decoded into
/// [`ChannelEvent`]s and dispatched to listeners registered with
/// [`GameChannel::on`]; `Connected`/`Disconnected` are synthesized around
/// transport opens and closures. A lost connection is retried automatically
/// up to the configured [`ReconnectPolicy`].
pub struct GameChannel {
    endpoint: String,
    session_key: String,
    policy: ReconnectPolicy,
    listeners: Arc<Mutex<ListenerRegistry>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl GameChannel {
    /// Creates a channel for the session identified by `session_key`.
    ///
    /// Trailing whitespace and slashes on `endpoint` are trimmed before the
    /// session key is appended.
    pub fn new(endpoint: impl Into<String>, session_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end().trim_end_matches('/').to_string(),
            session_key: session_key.into(),
            policy: ReconnectPolicy::default(),
            listeners: Arc::new(Mutex::new(ListenerRegistry::default())),
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Overrides the reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Session key this channel was built with.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Opens the connection for this channel's session.
    ///
    /// Spawns a background worker that owns the websocket; an existing
    /// worker is torn down first, so repeated calls replace the connection
    /// rather than leak one. Must be called within a tokio runtime.
    ///
    /// Errors only when the session key is empty; every later failure is
    /// handled by the reconnect path.
    pub fn connect(&self) -> Result<(), ChannelError> {
        if self.session_key.is_empty() {
            return Err(ChannelError::EmptySessionKey);
        }

        self.teardown_worker();
        self.shared.set_state(LinkState::Connecting);

        let shutdown = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(channel_worker(
            self.target_url(),
            self.policy.clone(),
            Arc::clone(&self.listeners),
            Arc::clone(&self.shared),
            Arc::clone(&shutdown),
        ));
        let mut guard = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(WorkerHandle { task, shutdown });
        Ok(())
    }

    /// Registers `handler` for every future event of `kind`.
    ///
    /// Handlers for a kind fire in registration order; registering the same
    /// handler twice invokes it twice. The returned [`Subscription`] removes
    /// exactly this registration.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let id = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(kind.clone(), handler);
        Subscription::new(Arc::downgrade(&self.listeners), kind, id)
    }

    /// Removes the registration with `id` under `kind`; no-op if absent.
    pub fn off(&self, kind: &EventKind, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(kind, id);
    }

    /// Serializes `message` and transmits it if the transport is open.
    ///
    /// Any other state is a silent no-op: nothing is queued and no error is
    /// reported. A message that fails to serialize is likewise dropped.
    pub fn send<T: Serialize>(&self, message: &T) {
        if self.state() != LinkState::Open {
            debug!(event = "send_discarded", reason = "transport not open");
            return;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                debug!(event = "send_discarded", %error);
                return;
            }
        };
        if let Some(sender) = self.shared.sender() {
            let _ = sender.send(text);
        }
    }

    /// Closes the connection and resets the channel.
    ///
    /// Tears down the worker (cancelling any scheduled reconnect), clears
    /// the entire listener registry, and returns the state to `Idle`. The
    /// channel will not reconnect on its own afterwards; `connect()` re-arms
    /// it.
    pub fn disconnect(&self) {
        self.teardown_worker();
        self.shared.set_state(LinkState::Idle);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn teardown_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = handle {
            // Flag first so the worker goes quiet, drop the sender so an
            // open session closes the socket out, then cancel whatever the
            // worker is awaiting (including a scheduled reconnect sleep).
            worker.shutdown.store(true, Ordering::SeqCst);
            self.shared.clear_sender();
            worker.task.abort();
        } else {
            self.shared.clear_sender();
        }
    }

    fn target_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.session_key)
    }
}

impl Drop for GameChannel {
    fn drop(&mut self) {
        self.teardown_worker();
    }
}

struct WorkerHandle {
    task: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<LinkState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_sender(&self, sender: mpsc::UnboundedSender<String>) {
        *self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    fn clear_sender(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn channel_worker(
    url: String,
    policy: ReconnectPolicy,
    listeners: Arc<Mutex<ListenerRegistry>>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        shared.set_state(LinkState::Connecting);

        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                attempts = 0;
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                shared.install_sender(outbound_tx);
                shared.set_state(LinkState::Open);
                debug!(event = "channel_open", url = %url);
                dispatch_event(&listeners, &ChannelEvent::Connected);

                run_open_session(socket, outbound_rx, &listeners).await;

                shared.clear_sender();
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                shared.set_state(LinkState::Closed);
                debug!(event = "channel_closed", url = %url);
                dispatch_event(&listeners, &ChannelEvent::Disconnected);
            }
            Err(error) => {
                debug!(event = "connect_failed", url = %url, %error);
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                shared.set_state(LinkState::Closed);
                dispatch_event(&listeners, &ChannelEvent::Disconnected);
            }
        }

        if !policy.allows_attempt(attempts) {
            warn!(event = "reconnect_exhausted", attempts, url = %url);
            return;
        }
        attempts += 1;
        debug!(
            event = "reconnect_scheduled",
            attempt = attempts,
            delay_ms = policy.delay.as_millis() as u64
        );
        tokio::time::sleep(policy.delay).await;
    }
}

/// Runs one open connection until it ends.
///
/// Inbound text frames are decoded and dispatched in arrival order;
/// undecodable frames are dropped. Outbound messages come from the channel
/// handle through `outbound_rx`; the sender disappearing means the handle
/// disconnected, so the socket is closed out.
async fn run_open_session(
    mut socket: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    listeners: &Mutex<ListenerRegistry>,
) {
    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => match ChannelEvent::decode(&text) {
                        Ok(event) => dispatch_event(listeners, &event),
                        Err(error) => debug!(event = "frame_discarded", %error),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => return,
                    Some(Ok(_)) => {
                        debug!(event = "frame_discarded", reason = "non-text frame");
                    }
                    Some(Err(error)) => {
                        debug!(event = "socket_error", %error);
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::PoisonError;

    use serde_json::json;

    use super::{ChannelError, GameChannel, LinkState};
    use crate::realtime::proto::EventKind;
    use crate::reconnect::ReconnectPolicy;

    #[tokio::test]
    async fn connect_rejects_an_empty_session_key() {
        let channel = GameChannel::new("ws://localhost:9/ws", "");
        assert_eq!(channel.connect(), Err(ChannelError::EmptySessionKey));
        assert_eq!(channel.state(), LinkState::Idle);
    }

    #[test]
    fn target_url_joins_endpoint_and_session_key() {
        let channel = GameChannel::new("ws://play.example/ws/", "ROOM1");
        assert_eq!(channel.target_url(), "ws://play.example/ws/ROOM1");

        let channel = GameChannel::new("ws://play.example/ws  \n", "ROOM2");
        assert_eq!(channel.target_url(), "ws://play.example/ws/ROOM2");
    }

    #[test]
    fn send_before_connect_is_a_silent_no_op() {
        let channel = GameChannel::new("ws://localhost:9/ws", "ROOM1");
        channel.send(&json!({"action": "start_game"}));
        assert_eq!(channel.state(), LinkState::Idle);
    }

    #[test]
    fn disconnect_without_connect_is_a_no_op() {
        let channel = GameChannel::new("ws://localhost:9/ws", "ROOM1");
        channel.disconnect();
        assert_eq!(channel.state(), LinkState::Idle);
    }

    #[test]
    fn disconnect_clears_registered_listeners() {
        let channel = GameChannel::new("ws://localhost:9/ws", "ROOM1")
            .with_reconnect_policy(ReconnectPolicy::disabled());
        let _winner = channel.on(EventKind::Winner, |_event| {});
        let _drawn = channel.on(EventKind::NumberDrawn, |_event| {});

        channel.disconnect();

        let guard = channel
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        assert_eq!(guard.registered_count(), 0);
    }

    #[test]
    fn off_removes_a_registration_by_id() {
        let channel = GameChannel::new("ws://localhost:9/ws", "ROOM1");
        let subscription = channel.on(EventKind::Winner, |_event| {});
        let id = subscription.id();

        channel.off(&EventKind::Winner, id);

        let guard = channel
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        assert_eq!(guard.registered_count(), 0);
    }
}
