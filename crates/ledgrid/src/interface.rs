// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Controller interface: producer subscription and live controller set.
//!
//! Subscribes to the producer frame topic and forwards every frame into the
//! frame buffer with its pattern context, marking the first frame of each
//! new pattern as priority. Tracks which controllers are attached and their
//! last-seen telemetry for status clients. Producer events are consumed in
//! arrival order; frames are never reordered.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::buffer::{BufferHandle, BufferSnapshot};
use crate::bus::{BusEvent, EventBus, TOPIC_EVENTS, TOPIC_FRAMES, TOPIC_SOCKET};
use crate::clock::unix_millis;
use crate::frame::PatternId;

/// Last-seen telemetry for one attached controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub joined_at_ms: u64,
    pub last_seen_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stats: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<serde_json::Value>,
    pub batches_acked: u64,
}

impl ControllerStats {
    fn new() -> Self {
        let now = unix_millis();
        Self {
            joined_at_ms: now,
            last_seen_ms: now,
            last_stats: None,
            last_sync: None,
            batches_acked: 0,
        }
    }
}

/// Status snapshot served to telemetry clients.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub connected: bool,
    pub count: usize,
    pub controllers: Vec<(String, ControllerStats)>,
    pub buffer: Option<BufferSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_detailed_stats: Option<serde_json::Value>,
}

/// Registry of live controllers plus the frame-routing task.
pub struct ControllerInterface {
    bus: Arc<EventBus>,
    buffer: BufferHandle,
    controllers: DashMap<String, ControllerStats>,
    last_detailed_stats: RwLock<Option<serde_json::Value>>,
}

impl ControllerInterface {
    pub fn new(bus: Arc<EventBus>, buffer: BufferHandle) -> Arc<Self> {
        Arc::new(Self {
            bus,
            buffer,
            controllers: DashMap::new(),
            last_detailed_stats: RwLock::new(None),
        })
    }

    /// Subscribe to the producer and lifecycle topics and start routing.
    pub fn spawn(self: &Arc<Self>) {
        let frames_rx = self.bus.subscribe(TOPIC_FRAMES);
        let events_rx = self.bus.subscribe(TOPIC_EVENTS);
        tokio::spawn(Arc::clone(self).run_frames(frames_rx));
        tokio::spawn(Arc::clone(self).run_events(events_rx));
    }

    /// Consume producer events and feed the buffer.
    async fn run_frames(self: Arc<Self>, mut rx: broadcast::Receiver<BusEvent>) {
        // Pattern the producer last announced; the first frame after a
        // change is forwarded with the priority hint set.
        let mut announced: Option<PatternId> = None;
        let mut last_routed: Option<PatternId> = None;

        loop {
            match rx.recv().await {
                Ok(BusEvent::PatternChanged { pattern_id, params }) => {
                    debug!("[ControllerInterface] pattern change announced: '{pattern_id}'");
                    announced = Some(pattern_id.clone());
                    // Sessions push pattern_changed to their controllers
                    // before any batch carrying the new pattern's frames.
                    self.bus
                        .publish(TOPIC_SOCKET, BusEvent::PatternChanged { pattern_id, params });
                }
                Ok(BusEvent::Frame { frame, pattern_id }) => {
                    let is_first_of_pattern = announced.as_ref() == Some(&pattern_id)
                        && last_routed.as_ref() != Some(&pattern_id);
                    last_routed = Some(pattern_id.clone());
                    if self
                        .buffer
                        .add_frame(frame, pattern_id, is_first_of_pattern)
                        .await
                        .is_err()
                    {
                        warn!("[ControllerInterface] buffer gone, stopping frame routing");
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[ControllerInterface] lagged, lost {n} producer events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Track joins and leaves announced by the session layer.
    async fn run_events(self: Arc<Self>, mut rx: broadcast::Receiver<BusEvent>) {
        loop {
            match rx.recv().await {
                Ok(BusEvent::ControllerJoined { controller_id }) => {
                    info!("[ControllerInterface] controller '{controller_id}' joined");
                    self.controllers
                        .insert(controller_id, ControllerStats::new());
                }
                Ok(BusEvent::ControllerLeft { controller_id }) => {
                    info!("[ControllerInterface] controller '{controller_id}' left");
                    self.controllers.remove(&controller_id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[ControllerInterface] lagged, lost {n} lifecycle events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Record a `stats` report from a controller.
    pub fn record_stats(&self, controller_id: &str, stats: serde_json::Value) {
        if let Some(mut entry) = self.controllers.get_mut(controller_id) {
            entry.last_seen_ms = unix_millis();
            entry.last_stats = Some(stats);
        }
    }

    /// Record a detailed stats report (operator-requested).
    pub async fn record_detailed_stats(&self, stats: serde_json::Value) {
        *self.last_detailed_stats.write().await = Some(stats);
    }

    /// Record a `display_sync` buffer report from a controller.
    pub fn record_display_sync(&self, controller_id: &str, sync: serde_json::Value) {
        if let Some(mut entry) = self.controllers.get_mut(controller_id) {
            entry.last_seen_ms = unix_millis();
            entry.last_sync = Some(sync);
        }
    }

    /// Count an acknowledged batch.
    pub fn record_ack(&self, controller_id: &str) {
        if let Some(mut entry) = self.controllers.get_mut(controller_id) {
            entry.last_seen_ms = unix_millis();
            entry.batches_acked += 1;
        }
    }

    /// Whether a controller is currently attached.
    #[must_use]
    pub fn is_attached(&self, controller_id: &str) -> bool {
        self.controllers.contains_key(controller_id)
    }

    /// Build the status snapshot, including the buffer's.
    pub async fn status(&self) -> InterfaceStatus {
        let controllers: Vec<(String, ControllerStats)> = self
            .controllers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        InterfaceStatus {
            connected: !controllers.is_empty(),
            count: controllers.len(),
            controllers,
            buffer: self.buffer.status().await.ok(),
            last_detailed_stats: self.last_detailed_stats.read().await.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBuffer;
    use crate::config::DeliveryConfig;
    use crate::frame::Frame;
    use std::time::Duration;

    fn rgb(id: u32) -> Frame {
        Frame::new(id, 1, 1, vec![1, 2, 3]).expect("valid frame")
    }

    #[tokio::test]
    async fn test_frames_are_routed_into_buffer() {
        let bus = Arc::new(EventBus::new());
        let buffer = FrameBuffer::spawn(DeliveryConfig::default());
        let interface = ControllerInterface::new(bus.clone(), buffer.clone());
        interface.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for id in 0..4 {
            bus.publish(
                TOPIC_FRAMES,
                BusEvent::Frame {
                    frame: rgb(id),
                    pattern_id: "aurora".into(),
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = buffer.status().await.expect("buffer alive");
        assert_eq!(snapshot.frames_in, 4);
        assert_eq!(snapshot.current_pattern.as_deref(), Some("aurora"));
    }

    #[tokio::test]
    async fn test_pattern_change_is_rebroadcast_before_frames() {
        let bus = Arc::new(EventBus::new());
        let buffer = FrameBuffer::spawn(DeliveryConfig::default());
        let interface = ControllerInterface::new(bus.clone(), buffer.clone());
        interface.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut socket_rx = bus.subscribe(TOPIC_SOCKET);
        bus.publish(
            TOPIC_FRAMES,
            BusEvent::PatternChanged {
                pattern_id: "fire".into(),
                params: serde_json::Value::Null,
            },
        );
        bus.publish(
            TOPIC_FRAMES,
            BusEvent::Frame {
                frame: rgb(1),
                pattern_id: "fire".into(),
            },
        );

        let event = tokio::time::timeout(Duration::from_millis(200), socket_rx.recv())
            .await
            .expect("no timeout")
            .expect("event");
        assert!(matches!(event, BusEvent::PatternChanged { pattern_id, .. } if pattern_id == "fire"));
    }

    #[tokio::test]
    async fn test_live_set_follows_join_and_leave() {
        let bus = Arc::new(EventBus::new());
        let buffer = FrameBuffer::spawn(DeliveryConfig::default());
        let interface = ControllerInterface::new(bus.clone(), buffer.clone());
        interface.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(
            TOPIC_EVENTS,
            BusEvent::ControllerJoined {
                controller_id: "c1".into(),
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(interface.is_attached("c1"));
        assert_eq!(interface.status().await.count, 1);

        bus.publish(
            TOPIC_EVENTS,
            BusEvent::ControllerLeft {
                controller_id: "c1".into(),
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!interface.is_attached("c1"));
        assert!(!interface.status().await.connected);
    }
}
