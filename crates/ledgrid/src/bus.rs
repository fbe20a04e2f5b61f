// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Process-wide pub/sub topic registry.
//!
//! A small broker with per-topic fan-out channels: publishers never block,
//! and a lagging subscriber loses old events rather than stalling the
//! producer. Topics are well-known; each has a fixed set of subscribers.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::frame::{Frame, PatternId};

/// Producer -> interface frame stream.
pub const TOPIC_FRAMES: &str = "controller:frames";

/// Controller lifecycle events (joins, leaves) consumed by the interface.
pub const TOPIC_EVENTS: &str = "controller:events";

/// Server -> session signals (pattern changes, operator requests).
pub const TOPIC_SOCKET: &str = "controller:socket";

/// Per-topic channel capacity. Subscribers that lag farther than this lose
/// the oldest events (lossy fan-out).
const TOPIC_CAPACITY: usize = 256;

/// Events carried on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A steady-state frame from the pattern runner.
    Frame {
        frame: Frame,
        pattern_id: PatternId,
    },

    /// Emitted before the first frame of a new pattern.
    PatternChanged {
        pattern_id: PatternId,
        params: serde_json::Value,
    },

    /// A controller completed its join handshake.
    ControllerJoined { controller_id: String },

    /// A controller session closed.
    ControllerLeft { controller_id: String },

    /// Operator asks all controllers for a stats report.
    RequestStats,

    /// Operator asks all controllers for a detailed stats report.
    RequestDetailedStats,

    /// Operator pushes simulator tuning to all controllers.
    SimulationConfig { params: serde_json::Value },
}

/// Topic registry with per-topic broadcast fan-out.
pub struct EventBus {
    topics: DashMap<&'static str, broadcast::Sender<BusEvent>>,
}

impl EventBus {
    /// Create a bus with the well-known topics registered.
    #[must_use]
    pub fn new() -> Self {
        let topics = DashMap::new();
        for topic in [TOPIC_FRAMES, TOPIC_EVENTS, TOPIC_SOCKET] {
            let (tx, _rx) = broadcast::channel(TOPIC_CAPACITY);
            topics.insert(topic, tx);
        }
        Self { topics }
    }

    /// Publish an event to a topic. Non-blocking; returns the number of
    /// subscribers that will observe it (0 when nobody is listening, which
    /// is not an error).
    pub fn publish(&self, topic: &'static str, event: BusEvent) -> usize {
        let Some(sender) = self.topics.get(topic) else {
            trace!("[EventBus::publish] unknown topic '{topic}', dropping");
            return 0;
        };
        match sender.send(event) {
            Ok(receivers) => receivers,
            // send fails only when no receiver exists; the event is moot.
            Err(_) => 0,
        }
    }

    /// Subscribe to a topic. Unknown topics get a fresh channel so callers
    /// never have to handle registration races.
    pub fn subscribe(&self, topic: &'static str) -> broadcast::Receiver<BusEvent> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &'static str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TOPIC_EVENTS);

        let delivered = bus.publish(
            TOPIC_EVENTS,
            BusEvent::ControllerJoined {
                controller_id: "c1".into(),
            },
        );
        assert_eq!(delivered, 1);

        match rx.recv().await.expect("event delivered") {
            BusEvent::ControllerJoined { controller_id } => assert_eq!(controller_id, "c1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(TOPIC_SOCKET, BusEvent::RequestStats), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let mut frames_rx = bus.subscribe(TOPIC_FRAMES);

        bus.publish(TOPIC_EVENTS, BusEvent::RequestStats);
        assert!(matches!(
            frames_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
