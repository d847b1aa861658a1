//! Realtime channel modules.
//!
//! - `channel`: websocket transport, listener API, and reconnect handling.
//! - `dispatch`: ordered listener registry keyed by event kind.
//! - `proto`: decoded event types shared with the game server.
//! - `session`: channel-fed snapshot of an ongoing game.

/// Websocket channel and listener API.
pub mod channel;
/// Listener registry and dispatch.
pub mod dispatch;
/// Protocol event types.
pub mod proto;
/// Game state tracking over a channel.
pub mod session;
