//! Channel-fed view of an ongoing game.
//!
//! [`GameTracker`] subscribes to every known event kind on a channel and
//! folds the stream into a [`GameSnapshot`]: connection status, drawn
//! numbers in arrival order, and the winner announcement.

use std::sync::{Arc, PoisonError, RwLock};

use crate::realtime::channel::GameChannel;
use crate::realtime::dispatch::Subscription;
use crate::realtime::proto::{ChannelEvent, EventKind, ServerEvent};

/// Snapshot of a game session as seen over the channel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GameSnapshot {
    /// Whether the transport is currently open.
    pub connected: bool,
    /// Whether a `game_started` event has been seen.
    pub started: bool,
    /// Numbers drawn so far, in arrival order.
    pub drawn: Vec<String>,
    /// Count of `player_joined` events seen.
    pub players_joined: u32,
    /// First winner announcement, if any.
    pub winner: Option<WinnerInfo>,
}

impl GameSnapshot {
    /// Most recently drawn number.
    pub fn last_number(&self) -> Option<&str> {
        self.drawn.last().map(String::as_str)
    }
}

/// Winner announcement carried by a `winner` event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinnerInfo {
    pub player_name: String,
    pub pattern: String,
}

/// Stateful consumer of a channel's event stream.
pub struct GameTracker {
    snapshot: Arc<RwLock<GameSnapshot>>,
    subscriptions: Vec<Subscription>,
}

impl GameTracker {
    /// Attaches a tracker to `channel`, registering a listener for every
    /// known event kind.
    pub fn attach(channel: &GameChannel) -> Self {
        let snapshot = Arc::new(RwLock::new(GameSnapshot::default()));
        let kinds = [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::NumberDrawn,
            EventKind::GameStarted,
            EventKind::Winner,
            EventKind::PlayerJoined,
        ];
        let subscriptions = kinds
            .into_iter()
            .map(|kind| {
                let state = Arc::clone(&snapshot);
                channel.on(kind, move |event| {
                    let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
                    apply(&mut guard, event);
                })
            })
            .collect();
        Self {
            snapshot,
            subscriptions,
        }
    }

    /// Current snapshot of the tracked game.
    pub fn snapshot(&self) -> GameSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unregisters every listener this tracker installed.
    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

fn apply(snapshot: &mut GameSnapshot, event: &ChannelEvent) {
    match event {
        ChannelEvent::Connected => snapshot.connected = true,
        ChannelEvent::Disconnected => snapshot.connected = false,
        ChannelEvent::Server(ServerEvent::NumberDrawn { number }) => {
            snapshot.drawn.push(number.clone());
        }
        ChannelEvent::Server(ServerEvent::GameStarted) => snapshot.started = true,
        ChannelEvent::Server(ServerEvent::Winner {
            player_name,
            pattern,
        }) => {
            if snapshot.winner.is_none() {
                snapshot.winner = Some(WinnerInfo {
                    player_name: player_name.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        ChannelEvent::Server(ServerEvent::PlayerJoined) => snapshot.players_joined += 1,
        ChannelEvent::Unknown { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{apply, GameSnapshot, WinnerInfo};
    use crate::realtime::proto::{ChannelEvent, ServerEvent};

    fn number_drawn(number: &str) -> ChannelEvent {
        ChannelEvent::Server(ServerEvent::NumberDrawn {
            number: number.to_string(),
        })
    }

    fn winner(player_name: &str, pattern: &str) -> ChannelEvent {
        ChannelEvent::Server(ServerEvent::Winner {
            player_name: player_name.to_string(),
            pattern: pattern.to_string(),
        })
    }

    #[test]
    fn folds_a_game_in_event_order() {
        let mut snapshot = GameSnapshot::default();
        apply(&mut snapshot, &ChannelEvent::Connected);
        apply(&mut snapshot, &ChannelEvent::Server(ServerEvent::PlayerJoined));
        apply(&mut snapshot, &ChannelEvent::Server(ServerEvent::GameStarted));
        apply(&mut snapshot, &number_drawn("B7"));
        apply(&mut snapshot, &number_drawn("O64"));
        apply(&mut snapshot, &winner("Ana", "full_card"));

        assert!(snapshot.connected);
        assert!(snapshot.started);
        assert_eq!(snapshot.drawn, vec!["B7", "O64"]);
        assert_eq!(snapshot.players_joined, 1);
        assert_eq!(snapshot.last_number(), Some("O64"));
        assert_eq!(
            snapshot.winner,
            Some(WinnerInfo {
                player_name: "Ana".to_string(),
                pattern: "full_card".to_string()
            })
        );
    }

    #[test]
    fn disconnect_flips_status_but_keeps_game_state() {
        let mut snapshot = GameSnapshot::default();
        apply(&mut snapshot, &ChannelEvent::Connected);
        apply(&mut snapshot, &number_drawn("N31"));
        apply(&mut snapshot, &ChannelEvent::Disconnected);

        assert!(!snapshot.connected);
        assert_eq!(snapshot.drawn, vec!["N31"]);
    }

    #[test]
    fn first_winner_announcement_wins() {
        let mut snapshot = GameSnapshot::default();
        apply(&mut snapshot, &winner("Ana", "full_card"));
        apply(&mut snapshot, &winner("Bo", "row"));

        assert_eq!(
            snapshot.winner.map(|info| info.player_name),
            Some("Ana".to_string())
        );
    }

    #[test]
    fn unknown_events_do_not_change_the_snapshot() {
        let mut snapshot = GameSnapshot::default();
        apply(
            &mut snapshot,
            &ChannelEvent::Unknown {
                kind: "chat_message".to_string(),
                payload: serde_json::json!({"type":"chat_message"}),
            },
        );
        assert_eq!(snapshot, GameSnapshot::default());
    }
}
