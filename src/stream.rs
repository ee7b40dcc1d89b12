//! Push notifications for connected clients.
//!
//! One broadcast channel carries "data changed" events; each subscriber
//! merges it with its own heartbeat ticker. Lagging subscribers skip the
//! events they missed instead of disconnecting.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected { timestamp: DateTime<Utc> },
    Heartbeat { timestamp: DateTime<Utc> },
    DataChanged { topic: String, timestamp: DateTime<Utc> },
}

impl StreamEvent {
    pub fn data_changed(topic: impl Into<String>) -> Self {
        StreamEvent::DataChanged {
            topic: topic.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<StreamEvent>,
    heartbeat: Duration,
}

impl Notifier {
    pub fn new(heartbeat: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, heartbeat }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: StreamEvent) -> usize {
        // Err only means nobody is listening
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(subscribers = delivered, "Published stream event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// `connected` first, then data events and heartbeats as they come.
    pub fn subscribe(&self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let mut ticker = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let state = Subscription {
            rx: self.tx.subscribe(),
            ticker,
            greeted: false,
        };
        stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
    }
}

struct Subscription {
    rx: broadcast::Receiver<StreamEvent>,
    ticker: Interval,
    greeted: bool,
}

impl Subscription {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        if !self.greeted {
            self.greeted = true;
            return Some(StreamEvent::Connected { timestamp: Utc::now() });
        }
        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    return Some(StreamEvent::Heartbeat { timestamp: Utc::now() });
                }
                received = self.rx.recv() => match received {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "Stream subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}
