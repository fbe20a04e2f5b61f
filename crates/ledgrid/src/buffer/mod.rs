// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Frame buffer actor.
//!
//! A single task owns the frame queues and all controller records; callers
//! interact through a cloneable [`BufferHandle`]. Frames are appended by the
//! controller interface and consumed when a controller's pull request is
//! serviced. Pattern changes preempt the regular queue; batch size adapts to
//! reported controller fullness; an auto-flush timer bounds latency.

mod queue;
mod record;
mod sizing;

pub use record::{ControllerRecord, PendingRequest};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::clock::unix_millis;
use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use crate::frame::{Frame, PatternId};
use crate::protocol::encode_batch;
use queue::{FrameQueues, QueuedFrame};

/// Auto-flush timer cadence. The flush threshold itself is
/// `DeliveryConfig::max_delay_ms`.
const AUTOFLUSH_TICK_MS: u64 = 100;

/// Command mailbox depth. Producers are expected to run at 30-60 fps; this
/// absorbs bursts without unbounded growth.
const COMMAND_CAPACITY: usize = 512;

/// Per-controller batch mailbox depth used by sessions.
pub const BATCH_MAILBOX_CAPACITY: usize = 32;

/// A composed batch on its way to one controller's session.
#[derive(Debug, Clone)]
pub struct OutboundBatch {
    pub controller_id: String,
    /// Encoded batch envelope (wire bytes).
    pub payload: Vec<u8>,
    pub sequence: u32,
    pub priority: bool,
    pub frame_count: usize,
}

/// Commands accepted by the buffer actor.
enum BufferCommand {
    AddFrame {
        frame: Frame,
        pattern_id: PatternId,
        priority_hint: bool,
    },
    BatchRequest {
        controller_id: String,
        last_acked_sequence: u32,
        space_available: usize,
        urgent: bool,
    },
    ControllerReport {
        controller_id: String,
        fullness: f32,
        can_receive: bool,
        sequence_received: u32,
        fps: f32,
    },
    RegisterController {
        controller_id: String,
        mailbox: mpsc::Sender<OutboundBatch>,
    },
    UnregisterController {
        controller_id: String,
    },
    FlushPending {
        priority: bool,
    },
    Status {
        reply: oneshot::Sender<BufferSnapshot>,
    },
}

/// Point-in-time view of the buffer, served to telemetry clients.
#[derive(Debug, Clone, Serialize)]
pub struct BufferSnapshot {
    pub priority_frames: usize,
    pub regular_frames: usize,
    pub current_pattern: Option<String>,
    pub dynamic_batch_size: usize,
    pub controllers: usize,
    pub pending_requests: usize,
    pub frames_in: u64,
    pub frames_out: u64,
    pub batches_out: u64,
    pub frames_dropped: u64,
    pub requests_debounced: u64,
    pub encode_failures: u64,
}

/// Delivery counters owned by the actor task.
#[derive(Debug, Default)]
struct BufferMetrics {
    frames_in: u64,
    frames_out: u64,
    batches_out: u64,
    frames_dropped: u64,
    requests_debounced: u64,
    encode_failures: u64,
}

/// Cloneable handle to the buffer actor.
#[derive(Clone)]
pub struct BufferHandle {
    tx: mpsc::Sender<BufferCommand>,
}

impl BufferHandle {
    /// Append a frame. `priority_hint` marks the first frame of a new
    /// pattern; the buffer also detects pattern changes on its own.
    pub async fn add_frame(
        &self,
        frame: Frame,
        pattern_id: impl Into<PatternId>,
        priority_hint: bool,
    ) -> Result<()> {
        self.send(BufferCommand::AddFrame {
            frame,
            pattern_id: pattern_id.into(),
            priority_hint,
        })
        .await
    }

    /// Record a controller pull request. Debounced unless `urgent`.
    pub async fn batch_request(
        &self,
        controller_id: impl Into<String>,
        last_acked_sequence: u32,
        space_available: usize,
        urgent: bool,
    ) -> Result<()> {
        self.send(BufferCommand::BatchRequest {
            controller_id: controller_id.into(),
            last_acked_sequence,
            space_available,
            urgent,
        })
        .await
    }

    /// Update a controller's flow-control report.
    pub async fn controller_report(
        &self,
        controller_id: impl Into<String>,
        fullness: f32,
        can_receive: bool,
        sequence_received: u32,
        fps: f32,
    ) -> Result<()> {
        self.send(BufferCommand::ControllerReport {
            controller_id: controller_id.into(),
            fullness,
            can_receive,
            sequence_received,
            fps,
        })
        .await
    }

    /// Attach a session mailbox. Resets the controller's sequence to 0.
    pub async fn register_controller(
        &self,
        controller_id: impl Into<String>,
        mailbox: mpsc::Sender<OutboundBatch>,
    ) -> Result<()> {
        self.send(BufferCommand::RegisterController {
            controller_id: controller_id.into(),
            mailbox,
        })
        .await
    }

    /// Drop a controller's record entirely (session closed).
    pub async fn unregister_controller(&self, controller_id: impl Into<String>) -> Result<()> {
        self.send(BufferCommand::UnregisterController {
            controller_id: controller_id.into(),
        })
        .await
    }

    /// Serve every controller with a pending request.
    pub async fn flush_pending(&self, priority: bool) -> Result<()> {
        self.send(BufferCommand::FlushPending { priority }).await
    }

    /// Fetch a snapshot of queues, records and counters.
    pub async fn status(&self) -> Result<BufferSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(BufferCommand::Status { reply }).await?;
        rx.await.map_err(|_| Error::ChannelClosed("buffer status"))
    }

    async fn send(&self, cmd: BufferCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| Error::ChannelClosed("buffer command"))
    }
}

/// The buffer actor. Construct with [`FrameBuffer::spawn`].
pub struct FrameBuffer {
    config: DeliveryConfig,
    queues: FrameQueues,
    current_pattern: Option<PatternId>,
    records: HashMap<String, ControllerRecord>,
    dynamic_batch_size: usize,
    metrics: BufferMetrics,
    last_flush: Instant,
    last_frame_at: Instant,
    rx: mpsc::Receiver<BufferCommand>,
}

impl FrameBuffer {
    /// Spawn the actor task and return its handle.
    pub fn spawn(config: DeliveryConfig) -> BufferHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let actor = Self {
            queues: FrameQueues::new(config.max_buffered),
            dynamic_batch_size: config.batch_size_max,
            current_pattern: None,
            records: HashMap::new(),
            metrics: BufferMetrics::default(),
            last_flush: Instant::now(),
            last_frame_at: Instant::now(),
            config,
            rx,
        };
        tokio::spawn(actor.run());
        BufferHandle { tx }
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(AUTOFLUSH_TICK_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("[FrameBuffer] all handles dropped, stopping");
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick(),
            }
        }
    }

    fn handle_command(&mut self, cmd: BufferCommand) {
        match cmd {
            BufferCommand::AddFrame {
                frame,
                pattern_id,
                priority_hint,
            } => self.on_add_frame(frame, pattern_id, priority_hint),
            BufferCommand::BatchRequest {
                controller_id,
                last_acked_sequence,
                space_available,
                urgent,
            } => self.on_batch_request(&controller_id, last_acked_sequence, space_available, urgent),
            BufferCommand::ControllerReport {
                controller_id,
                fullness,
                can_receive,
                sequence_received,
                fps,
            } => self.on_controller_report(&controller_id, fullness, can_receive, sequence_received, fps),
            BufferCommand::RegisterController {
                controller_id,
                mailbox,
            } => self.on_register(controller_id, mailbox),
            BufferCommand::UnregisterController { controller_id } => {
                self.records.remove(&controller_id);
                self.recompute_batch_size();
                debug!("[FrameBuffer] controller '{controller_id}' unregistered");
            }
            BufferCommand::FlushPending { priority } => self.flush_pending(priority),
            BufferCommand::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // ------------------------------------------------------------------
    // Frame intake
    // ------------------------------------------------------------------

    fn on_add_frame(&mut self, frame: Frame, pattern_id: PatternId, priority_hint: bool) {
        self.metrics.frames_in += 1;
        self.last_frame_at = Instant::now();

        let pattern_change = matches!(&self.current_pattern, Some(p) if *p != pattern_id);

        if pattern_change || priority_hint {
            if !self.queues.is_empty() {
                // Drain the previous pattern cleanly before the switch.
                self.flush_pending(true);
            }
            if pattern_change {
                let promoted = self.queues.promote_regular();
                if promoted > 0 {
                    trace!(
                        "[FrameBuffer] pattern '{pattern_id}': promoted {promoted} leftover frames"
                    );
                }
            }
            self.current_pattern = Some(pattern_id.clone());
            self.queues.push_priority(QueuedFrame { frame, pattern_id });
        } else {
            if self.current_pattern.is_none() {
                self.current_pattern = Some(pattern_id.clone());
            }
            self.queues.push_regular(QueuedFrame { frame, pattern_id });
        }

        let outcome = self
            .queues
            .enforce_cap(self.current_pattern.as_deref());
        if outcome.dropped > 0 {
            self.metrics.frames_dropped += outcome.dropped as u64;
            warn!(
                "[FrameBuffer] overflow: dropped {} oldest frames (cap {})",
                outcome.dropped, self.config.max_buffered
            );
        }
        if outcome.emergency_flush {
            warn!("[FrameBuffer] overflow of current-pattern priority frames, emergency flush");
            self.flush_pending(true);
        }
    }

    // ------------------------------------------------------------------
    // Pull requests and reports
    // ------------------------------------------------------------------

    fn on_batch_request(
        &mut self,
        controller_id: &str,
        last_acked_sequence: u32,
        space_available: usize,
        urgent: bool,
    ) {
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);
        let record = self
            .records
            .entry(controller_id.to_string())
            .or_insert_with(|| ControllerRecord::new(controller_id));

        if !urgent {
            if let Some(at) = record.last_request_at {
                if at.elapsed() < min_interval {
                    self.metrics.requests_debounced += 1;
                    trace!("[FrameBuffer] debounced request from '{controller_id}'");
                    return;
                }
            }
        }

        record.last_request_at = Some(Instant::now());
        record.last_acked_sequence = record.last_acked_sequence.max(last_acked_sequence);
        record.pending_request = Some(PendingRequest {
            last_acked_sequence,
            space_available,
            urgent,
            received_at: Instant::now(),
        });

        if urgent || self.queues.total_len() >= self.config.min_flush_frames {
            self.serve(controller_id, false);
        }
    }

    fn on_controller_report(
        &mut self,
        controller_id: &str,
        fullness: f32,
        can_receive: bool,
        sequence_received: u32,
        fps: f32,
    ) {
        let record = self
            .records
            .entry(controller_id.to_string())
            .or_insert_with(|| ControllerRecord::new(controller_id));

        record.reported_fullness = fullness.clamp(0.0, 1.0);
        record.can_receive = can_receive;
        record.reported_fps = fps;
        record.has_reported = true;
        record.last_acked_sequence = record.last_acked_sequence.max(sequence_received);

        self.recompute_batch_size();

        let hungry = self
            .records
            .values()
            .any(|r| r.has_reported && r.reported_fullness < 0.2 && r.can_receive);
        if hungry && self.queues.total_len() >= self.config.min_flush_frames {
            self.flush_pending(false);
        }
    }

    fn on_register(&mut self, controller_id: String, mailbox: mpsc::Sender<OutboundBatch>) {
        let record = self
            .records
            .entry(controller_id.clone())
            .or_insert_with(|| ControllerRecord::new(&controller_id));
        // Fresh join: sequence restarts, stale request state is discarded.
        record.mailbox = Some(mailbox);
        record.last_sent_sequence = 0;
        record.last_acked_sequence = 0;
        record.pending_request = None;
        record.last_request_at = None;
        debug!("[FrameBuffer] controller '{controller_id}' registered");
    }

    // ------------------------------------------------------------------
    // Batch composition
    // ------------------------------------------------------------------

    /// Compose and emit one batch for `controller_id` if it has a pending
    /// request and frames are available. Returns true when a batch was
    /// handed to the session.
    fn serve(&mut self, controller_id: &str, force_priority: bool) -> bool {
        let Some(record) = self.records.get_mut(controller_id) else {
            return false;
        };
        let Some(pending) = record.pending_request.clone() else {
            return false;
        };
        let Some(mailbox) = record.mailbox.clone() else {
            trace!("[FrameBuffer] '{controller_id}' has no session mailbox yet");
            return false;
        };

        let cap = pending.space_available.min(self.dynamic_batch_size);
        let prio_take = self
            .queues
            .priority_len()
            .min(cap.min(self.config.priority_batch_size_max));
        let reg_take = self.queues.regular_len().min(cap - prio_take);
        if prio_take + reg_take == 0 {
            return false;
        }

        let queued = self.queues.pop_batch(prio_take, reg_take);
        let frames: Vec<Frame> = queued.iter().map(|q| q.frame.clone()).collect();
        let frame_count = frames.len();
        let is_priority = force_priority || prio_take > 0;
        let next_sequence = record.last_sent_sequence + 1;

        let payload = match encode_batch(&frames, is_priority, next_sequence, unix_millis()) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Offending frames are dropped; the sequence is not advanced.
                warn!("[FrameBuffer] encode failed for '{controller_id}': {e}, dropping {frame_count} frames");
                self.metrics.encode_failures += 1;
                self.metrics.frames_dropped += frame_count as u64;
                record.pending_request = None;
                return false;
            }
        };

        let batch = OutboundBatch {
            controller_id: controller_id.to_string(),
            payload,
            sequence: next_sequence,
            priority: is_priority,
            frame_count,
        };

        match mailbox.try_send(batch) {
            Ok(()) => {
                record.last_sent_sequence = next_sequence;
                record.pending_request = None;
                self.metrics.batches_out += 1;
                self.metrics.frames_out += frame_count as u64;
                self.last_flush = Instant::now();
                trace!(
                    "[FrameBuffer] served '{controller_id}' seq={next_sequence} \
                     frames={frame_count} priority={is_priority}"
                );
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Session is draining slowly; keep the request, retry later.
                warn!("[FrameBuffer] mailbox full for '{controller_id}', requeueing batch");
                self.queues.requeue_front(queued, prio_take);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[FrameBuffer] mailbox closed for '{controller_id}'");
                record.mailbox = None;
                record.pending_request = None;
                self.queues.requeue_front(queued, prio_take);
                false
            }
        }
    }

    fn flush_pending(&mut self, force_priority: bool) {
        let with_requests: Vec<String> = self
            .records
            .values()
            .filter(|r| r.pending_request.is_some())
            .map(|r| r.id.clone())
            .collect();
        for id in with_requests {
            self.serve(&id, force_priority);
        }
    }

    fn on_tick(&mut self) {
        if self.queues.is_empty() {
            return;
        }
        let has_pending = self.records.values().any(|r| r.pending_request.is_some());
        if !has_pending {
            return;
        }

        let delay = Duration::from_millis(self.config.max_delay_ms);
        let flush_due = self.last_flush.elapsed() >= delay;
        let idle_due = self.last_frame_at.elapsed() >= delay
            && self.queues.total_len() >= self.config.min_flush_frames;

        if flush_due || idle_due {
            self.flush_pending(false);
        }
    }

    fn recompute_batch_size(&mut self) {
        self.dynamic_batch_size =
            sizing::dynamic_batch_size(self.records.values(), self.config.batch_size_max);
    }

    fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            priority_frames: self.queues.priority_len(),
            regular_frames: self.queues.regular_len(),
            current_pattern: self.current_pattern.clone(),
            dynamic_batch_size: self.dynamic_batch_size,
            controllers: self.records.len(),
            pending_requests: self
                .records
                .values()
                .filter(|r| r.pending_request.is_some())
                .count(),
            frames_in: self.metrics.frames_in,
            frames_out: self.metrics.frames_out,
            batches_out: self.metrics.batches_out,
            frames_dropped: self.metrics.frames_dropped,
            requests_debounced: self.metrics.requests_debounced,
            encode_failures: self.metrics.encode_failures,
        }
    }
}
