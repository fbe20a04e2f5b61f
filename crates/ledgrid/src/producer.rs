// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Producer adapter: the contract a pattern runner publishes through.
//!
//! The runner stays external to the fabric; all it needs is a
//! [`ProducerHandle`]. Frames arrive at whatever rate the pattern defines
//! (typically 30-60 fps); slower producers do not grow the buffer because
//! frames are served as they arrive under pull.

use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;

use crate::bus::{BusEvent, EventBus, TOPIC_FRAMES};
use crate::frame::{Frame, PatternId};

/// Events a producer publishes on the frames topic.
///
/// `PatternChanged` is emitted before the first frame of a new pattern so
/// downstream consumers can preempt the old pattern's queue.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    Frame {
        frame: Frame,
        pattern_id: PatternId,
    },
    PatternChanged {
        pattern_id: PatternId,
        params: serde_json::Value,
    },
}

/// Publishing side of the producer contract.
///
/// Tracks the current pattern so `send_frame` with a new pattern id
/// announces the change first; a runner can also announce explicitly with
/// [`ProducerHandle::change_pattern`] to attach parameters.
pub struct ProducerHandle {
    bus: Arc<EventBus>,
    current_pattern: Mutex<Option<PatternId>>,
}

impl ProducerHandle {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            current_pattern: Mutex::new(None),
        }
    }

    /// Publish a producer event onto the frames topic.
    ///
    /// A `Frame` whose pattern differs from the current one is preceded by
    /// a `PatternChanged` announcement (with no parameters).
    pub fn publish(&self, event: ProducerEvent) {
        match event {
            ProducerEvent::Frame { frame, pattern_id } => {
                if self.mark_pattern(&pattern_id) {
                    self.bus.publish(
                        TOPIC_FRAMES,
                        BusEvent::PatternChanged {
                            pattern_id: pattern_id.clone(),
                            params: serde_json::Value::Null,
                        },
                    );
                }
                self.bus
                    .publish(TOPIC_FRAMES, BusEvent::Frame { frame, pattern_id });
            }
            ProducerEvent::PatternChanged { pattern_id, params } => {
                debug!("[ProducerHandle] pattern change: '{pattern_id}'");
                self.mark_pattern(&pattern_id);
                self.bus
                    .publish(TOPIC_FRAMES, BusEvent::PatternChanged { pattern_id, params });
            }
        }
    }

    /// Publish one frame.
    pub fn send_frame(&self, frame: Frame, pattern_id: impl Into<PatternId>) {
        self.publish(ProducerEvent::Frame {
            frame,
            pattern_id: pattern_id.into(),
        });
    }

    /// Announce a pattern change with its parameters. The next `send_frame`
    /// for this pattern will not re-announce.
    pub fn change_pattern(&self, pattern_id: impl Into<PatternId>, params: serde_json::Value) {
        self.publish(ProducerEvent::PatternChanged {
            pattern_id: pattern_id.into(),
            params,
        });
    }

    /// Record `pattern_id` as current; true when it differs from before.
    fn mark_pattern(&self, pattern_id: &str) -> bool {
        let mut current = self
            .current_pattern
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let changed = current.as_deref() != Some(pattern_id);
        if changed {
            *current = Some(pattern_id.to_string());
        }
        changed
    }
}
