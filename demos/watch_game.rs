use std::error::Error;
use std::time::Duration;

use bingo_sdk::realtime::channel::GameChannel;
use bingo_sdk::realtime::proto::{ChannelEvent, EventKind, ServerEvent};
use bingo_sdk::realtime::session::GameTracker;

fn main() -> Result<(), Box<dyn Error>> {
    let endpoint = "REPLACE_WITH_ENDPOINT"; // eg ws://localhost:8000/ws
    let session_key = "REPLACE_WITH_SESSION_KEY";

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let channel = GameChannel::new(endpoint, session_key);
        let tracker = GameTracker::attach(&channel);

        let _drawn = channel.on(EventKind::NumberDrawn, |event| {
            if let ChannelEvent::Server(ServerEvent::NumberDrawn { number }) = event {
                println!("number drawn: {number}");
            }
        });
        let _winner = channel.on(EventKind::Winner, |event| {
            if let ChannelEvent::Server(ServerEvent::Winner {
                player_name,
                pattern,
            }) = event
            {
                println!("winner: {player_name} ({pattern})");
            }
        });
        let _status = channel.on(EventKind::Connected, |_event| {
            println!("connected");
        });

        channel.connect()?;

        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let snapshot = tracker.snapshot();
            println!(
                "connected={} started={} numbers_drawn={}",
                snapshot.connected,
                snapshot.started,
                snapshot.drawn.len()
            );
            if snapshot.winner.is_some() {
                break;
            }
        }

        channel.disconnect();
        Ok::<(), Box<dyn Error>>(())
    })
}
