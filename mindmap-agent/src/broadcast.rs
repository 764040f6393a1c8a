// Per-session pub/sub fan-out.
//
// Each session code is a topic backed by a `tokio::sync::broadcast` channel.
// Publishing is best effort: a topic with no subscribers silently drops the
// event, and a subscriber that falls behind skips the events it missed.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{Outbound, SessionEvent};

/// Buffered events per topic before slow subscribers start lagging.
pub const TOPIC_CAPACITY: usize = 256;

#[derive(Default)]
pub struct Broadcaster {
    topics: HashMap<String, broadcast::Sender<SessionEvent>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic, creating it on first use.
    pub fn subscribe(&mut self, topic: &str) -> broadcast::Receiver<SessionEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Send an event to every current subscriber of `topic`. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, topic: &str, event: SessionEvent) -> usize {
        match self.topics.get(topic) {
            Some(tx) => match tx.send(event) {
                Ok(n) => n,
                Err(_) => {
                    debug!(topic, "published to topic with no subscribers");
                    0
                }
            },
            None => 0,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Drop topics nobody is listening to any more.
    pub fn prune(&mut self) {
        self.topics.retain(|_, tx| tx.receiver_count() > 0);
    }
}

/// Forward everything published on a topic into a connection's outbound
/// queue. The task ends when the connection's queue closes or the topic is
/// dropped; abort the handle to unsubscribe early.
pub fn spawn_forwarder(
    mut rx: broadcast::Receiver<SessionEvent>,
    outbound: mpsc::Sender<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if outbound.send(Outbound::Event(event)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
