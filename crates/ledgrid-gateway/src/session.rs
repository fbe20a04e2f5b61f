// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Per-controller WebSocket session.
//!
//! Each attached controller gets one session task that owns the socket:
//! join handshake, pull-priming, request/ack dispatch, batch push, and the
//! heartbeat deadline. Batches arrive from the frame buffer through a
//! per-session mailbox; bus signals (pattern changes, operator requests)
//! through a broadcast subscription.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ledgrid::buffer::BATCH_MAILBOX_CAPACITY;
use ledgrid::clock::unix_millis;
use ledgrid::{decode_batch, pattern_hash, BusEvent, OutboundBatch, TOPIC_EVENTS, TOPIC_SOCKET};

use crate::protocol::{
    ClientMessage, ErrorCode, LegacyFrame, Reply, ServerMessage, DEFAULT_SPACE_AVAILABLE,
};
use crate::state::AppState;

/// How long a socket may stay silent before the join handshake.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Priming schedule after a successful join.
const PRIME_POLL_DELAY: Duration = Duration::from_millis(500);
const PRIME_REQUEST_DELAY: Duration = Duration::from_millis(1000);
const PRIME_REPEAT_DELAY: Duration = Duration::from_millis(2000);

/// Malformed messages tolerated inside the strike window before the session
/// is terminated.
const DECODE_STRIKE_LIMIT: u32 = 3;
const DECODE_STRIKE_WINDOW: Duration = Duration::from_secs(10);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Joining,
    Ready,
    Idle,
    Serving,
    Closed,
}

/// Messages queued for the socket writer.
enum Outbound {
    Event(ServerMessage),
    Reply(Reply),
    Binary(Vec<u8>),
}

/// A WebSocket controller session.
pub struct ControllerSession {
    app: Arc<AppState>,
    /// Short id for log correlation, distinct from the controller id.
    session_id: String,
    controller_id: String,
    state: SessionState,
    /// Controller wants raw binary frames instead of base64-in-JSON.
    binary_frames: bool,
    last_acked_sequence: u32,
    last_pushed_sequence: u32,
    /// When acknowledgment state last moved, for the replay-policy warning.
    last_ack_at: Instant,
    /// Pattern last announced on the socket topic, for the legacy path.
    current_pattern: Option<String>,
    strikes: u32,
    strike_window_start: Instant,
}

impl ControllerSession {
    pub fn new(app: Arc<AppState>) -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        info!("[{}] New session created", session_id);

        Self {
            app,
            session_id,
            controller_id: String::new(),
            state: SessionState::Joining,
            binary_frames: false,
            last_acked_sequence: 0,
            last_pushed_sequence: 0,
            last_ack_at: Instant::now(),
            current_pattern: None,
            strikes: 0,
            strike_window_start: Instant::now(),
        }
    }

    /// Record acknowledgment progress reported by the controller (acks,
    /// display_sync reports, and pull requests all carry it).
    fn note_ack(&mut self, sequence: u32) {
        self.last_acked_sequence = self.last_acked_sequence.max(sequence);
        self.last_ack_at = Instant::now();
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                "[{}] state {:?} -> {:?}",
                self.session_id, self.state, next
            );
            self.state = next;
        }
    }

    /// Run the session until the controller disconnects or dies.
    pub async fn run(mut self, socket: WebSocket) {
        let (ws_tx, mut ws_rx) = socket.split();

        // Writer pump: everything outbound funnels through one channel so
        // replies, pushed events, and binary batches never interleave badly.
        let (out_tx, out_rx) = mpsc::channel::<Outbound>(256);
        let writer = tokio::spawn(Self::write_pump(ws_tx, out_rx, self.session_id.clone()));

        match tokio::time::timeout(JOIN_TIMEOUT, self.await_join(&mut ws_rx, &out_tx)).await {
            Ok(true) => {
                self.serve(ws_rx, out_tx).await;
            }
            Ok(false) => {
                debug!("[{}] socket closed before join", self.session_id);
            }
            Err(_) => {
                warn!("[{}] join timeout, closing", self.session_id);
            }
        }

        self.transition(SessionState::Closed);
        writer.abort();
        info!("[{}] Session ended", self.session_id);
    }

    /// Serialize and send queued outbound traffic.
    async fn write_pump(
        mut ws_tx: SplitSink<WebSocket, Message>,
        mut rx: mpsc::Receiver<Outbound>,
        session_id: String,
    ) {
        while let Some(out) = rx.recv().await {
            let message = match out {
                Outbound::Binary(bytes) => Message::Binary(bytes),
                Outbound::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!("[{session_id}] failed to serialize event: {e}");
                        continue;
                    }
                },
                Outbound::Reply(reply) => match serde_json::to_string(&reply) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        error!("[{session_id}] failed to serialize reply: {e}");
                        continue;
                    }
                },
            };
            if ws_tx.send(message).await.is_err() {
                debug!("[{session_id}] WebSocket send failed, closing writer");
                break;
            }
        }
    }

    /// Consume messages until a `join` arrives. Returns false when the
    /// socket closes first.
    async fn await_join(
        &mut self,
        ws_rx: &mut SplitStream<WebSocket>,
        out_tx: &mpsc::Sender<Outbound>,
    ) -> bool {
        while let Some(msg) = ws_rx.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => return false,
                Ok(_) => continue,
            };

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join {
                    controller_id,
                    binary,
                }) => {
                    self.controller_id = controller_id;
                    self.binary_frames = binary;
                    self.transition(SessionState::Ready);
                    info!(
                        "[{}] controller '{}' joined (binary={})",
                        self.session_id, self.controller_id, binary
                    );
                    let _ = out_tx
                        .send(Outbound::Reply(Reply::joined(
                            self.controller_id.clone(),
                            unix_millis(),
                        )))
                        .await;
                    return true;
                }
                Ok(_) => {
                    let _ = out_tx
                        .send(Outbound::Event(ServerMessage::Error {
                            code: ErrorCode::NotJoined,
                            message: "join required before any other event".into(),
                        }))
                        .await;
                }
                Err(e) => {
                    let _ = out_tx
                        .send(Outbound::Event(ServerMessage::Error {
                            code: ErrorCode::InvalidMessage,
                            message: format!("invalid JSON: {e}"),
                        }))
                        .await;
                }
            }
        }
        false
    }

    /// Post-join main loop: registration, priming, dispatch, heartbeat.
    async fn serve(&mut self, mut ws_rx: SplitStream<WebSocket>, out_tx: mpsc::Sender<Outbound>) {
        let controller_id = self.controller_id.clone();

        let (batch_tx, mut batch_rx) = mpsc::channel::<OutboundBatch>(BATCH_MAILBOX_CAPACITY);
        if self
            .app
            .buffer
            .register_controller(&controller_id, batch_tx)
            .await
            .is_err()
        {
            error!("[{}] frame buffer unavailable", self.session_id);
            return;
        }
        let mut socket_rx = self.app.bus.subscribe(TOPIC_SOCKET);
        self.app.bus.publish(
            TOPIC_EVENTS,
            BusEvent::ControllerJoined {
                controller_id: controller_id.clone(),
            },
        );

        // Priming deadlines: polling hint, then a synthetic urgent request,
        // then the same request once more in case the first raced the
        // producer. Frames must flow within ~1s of join even if the
        // controller never pulls.
        let joined_at = Instant::now();
        let prime_poll_at = joined_at + PRIME_POLL_DELAY;
        let prime_request_at = joined_at + PRIME_REQUEST_DELAY;
        let prime_repeat_at = joined_at + PRIME_REPEAT_DELAY;
        let mut poll_sent = false;
        let mut primed = false;
        let mut reprimed = false;

        let heartbeat = Duration::from_millis(self.app.config.heartbeat_timeout_ms);
        let ack_timeout = Duration::from_millis(self.app.config.ack_timeout_ms);
        let mut deadline = Instant::now() + heartbeat;
        self.last_ack_at = Instant::now();

        loop {
            tokio::select! {
                biased;

                // Bus signals first: a pattern_changed notification must
                // reach the controller before the batch that carries the
                // new pattern's frames.
                signal = socket_rx.recv() => {
                    match signal {
                        Ok(event) => self.handle_signal(event, &out_tx).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("[{}] lagged {} bus signals", self.session_id, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }

                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => self.push_batch(batch, &out_tx).await,
                        None => {
                            // Buffer dropped our mailbox; nothing left to serve.
                            debug!("[{}] batch mailbox closed", self.session_id);
                            break;
                        }
                    }
                }

                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            deadline = Instant::now() + heartbeat;
                            if !self.handle_message(&text, &out_tx).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            deadline = Instant::now() + heartbeat;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            warn!("[{}] binary inbound not supported", self.session_id);
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[{}] controller closed connection", self.session_id);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[{}] WebSocket error: {}", self.session_id, e);
                            break;
                        }
                        None => break,
                    }
                }

                _ = tokio::time::sleep_until(prime_poll_at), if !poll_sent => {
                    poll_sent = true;
                    self.transition(SessionState::Idle);
                    let _ = out_tx.send(Outbound::Event(ServerMessage::InitiatePolling {
                        message: "start pulling frame batches".into(),
                    })).await;
                    let _ = out_tx.send(Outbound::Event(ServerMessage::DiagnosticPing {
                        timestamp: unix_millis(),
                        message: "connectivity check".into(),
                    })).await;
                }

                _ = tokio::time::sleep_until(prime_request_at), if !primed => {
                    primed = true;
                    self.synthetic_request().await;
                }

                _ = tokio::time::sleep_until(prime_repeat_at), if !reprimed => {
                    reprimed = true;
                    self.synthetic_request().await;
                }

                // Replay policy: batches outstanding past the ack timeout
                // get a warning, nothing more. Frames are perishable.
                _ = tokio::time::sleep_until(self.last_ack_at + ack_timeout),
                    if self.last_pushed_sequence > self.last_acked_sequence =>
                {
                    warn!(
                        "[{}] '{}' has not acked past seq {} for {}ms (pushed {}), continuing without resend",
                        self.session_id, controller_id, self.last_acked_sequence,
                        ack_timeout.as_millis(), self.last_pushed_sequence
                    );
                    // Re-arm so the warning repeats once per interval, not
                    // every poll.
                    self.last_ack_at = Instant::now();
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        "[{}] no heartbeat from '{}' for {}s, declaring dead",
                        self.session_id, controller_id, heartbeat.as_secs()
                    );
                    break;
                }
            }
        }

        // Cleanup: forget the record and announce the departure. The
        // controller may rejoin at any time; its sequence then restarts.
        let _ = self.app.buffer.unregister_controller(&controller_id).await;
        self.app.bus.publish(
            TOPIC_EVENTS,
            BusEvent::ControllerLeft { controller_id },
        );
    }

    /// Issue an urgent pull request on the controller's behalf.
    async fn synthetic_request(&self) {
        let _ = self
            .app
            .buffer
            .batch_request(
                &self.controller_id,
                self.last_acked_sequence,
                DEFAULT_SPACE_AVAILABLE as usize,
                true,
            )
            .await;
    }

    /// Forward a composed batch to the controller.
    async fn push_batch(&mut self, batch: OutboundBatch, out_tx: &mpsc::Sender<Outbound>) {
        self.transition(SessionState::Serving);
        self.last_pushed_sequence = batch.sequence;

        if self.app.options.legacy_frames {
            self.push_legacy_frame(&batch, out_tx).await;
        }

        let out = if self.binary_frames {
            Outbound::Binary(batch.payload)
        } else {
            Outbound::Event(ServerMessage::DisplayBatch {
                frames: BASE64.encode(&batch.payload),
                count: batch.frame_count as u32,
                priority: batch.priority,
                sequence: batch.sequence,
            })
        };
        let _ = out_tx.send(out).await;

        // Fire and forget: no wait for the ack.
        self.transition(SessionState::Idle);
    }

    /// Legacy compatibility: push the newest frame of the batch as a single
    /// `display` event for controllers that predate batching.
    async fn push_legacy_frame(&self, batch: &OutboundBatch, out_tx: &mpsc::Sender<Outbound>) {
        let envelope = match decode_batch(&batch.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("[{}] legacy re-decode failed: {e}", self.session_id);
                return;
            }
        };
        let Some(frame) = envelope.frames.last() else {
            return;
        };
        let pattern = self
            .current_pattern
            .as_deref()
            .map_or(0, pattern_hash);
        let _ = out_tx
            .send(Outbound::Event(ServerMessage::Display {
                frame: LegacyFrame {
                    id: frame.id,
                    width: frame.width,
                    height: frame.height,
                    pixels: BASE64.encode(&frame.pixels),
                    pattern,
                },
            }))
            .await;
    }

    /// React to a bus signal addressed at live sessions.
    async fn handle_signal(&mut self, event: BusEvent, out_tx: &mpsc::Sender<Outbound>) {
        match event {
            BusEvent::PatternChanged { pattern_id, .. } => {
                self.current_pattern = Some(pattern_id.clone());
                let _ = out_tx
                    .send(Outbound::Event(ServerMessage::PatternChanged {
                        pattern_id,
                        timestamp: unix_millis(),
                    }))
                    .await;
                // Prime the flow for the new pattern without waiting for
                // the controller's next pull.
                self.synthetic_request().await;
            }
            BusEvent::RequestStats => {
                let _ = out_tx.send(Outbound::Event(ServerMessage::RequestStats {})).await;
            }
            BusEvent::RequestDetailedStats => {
                let _ = out_tx
                    .send(Outbound::Event(ServerMessage::RequestDetailedStats {}))
                    .await;
            }
            BusEvent::SimulationConfig { params } => {
                let _ = out_tx
                    .send(Outbound::Event(ServerMessage::SimulationConfig { params }))
                    .await;
            }
            _ => {}
        }
    }

    /// Dispatch one inbound text message. Returns false when the session
    /// must terminate.
    async fn handle_message(&mut self, text: &str, out_tx: &mpsc::Sender<Outbound>) -> bool {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => return self.on_decode_error(&e, out_tx).await,
        };

        match msg {
            ClientMessage::Join { .. } => {
                warn!("[{}] duplicate join ignored", self.session_id);
            }
            ClientMessage::Ping { .. } => {
                let _ = out_tx.send(Outbound::Reply(Reply::pong())).await;
            }
            ClientMessage::Stats { payload } => {
                if payload.get("detailed").and_then(serde_json::Value::as_bool) == Some(true) {
                    self.app.interface.record_detailed_stats(payload.clone()).await;
                }
                self.app.interface.record_stats(&self.controller_id, payload);
            }
            ClientMessage::DisplaySync { buffer_stats } => {
                self.note_ack(buffer_stats.sequence_received);
                self.app.interface.record_display_sync(
                    &self.controller_id,
                    serde_json::to_value(buffer_stats).unwrap_or_default(),
                );
                let _ = self
                    .app
                    .buffer
                    .controller_report(
                        &self.controller_id,
                        buffer_stats.fullness,
                        buffer_stats.can_receive,
                        buffer_stats.sequence_received,
                        buffer_stats.fps,
                    )
                    .await;
            }
            ClientMessage::BatchRequest {
                last_sequence,
                space_available,
                urgent,
            } => {
                self.note_ack(last_sequence);
                let _ = self
                    .app
                    .buffer
                    .batch_request(
                        &self.controller_id,
                        last_sequence,
                        space_available as usize,
                        urgent,
                    )
                    .await;
                let _ = out_tx
                    .send(Outbound::Reply(Reply::request_received(
                        unix_millis(),
                        last_sequence,
                    )))
                    .await;
            }
            ClientMessage::BatchAck {
                sequence, rendered, ..
            } => {
                self.note_ack(sequence);
                self.app.interface.record_ack(&self.controller_id);
                if !rendered {
                    // Not acted on beyond logging: frames are perishable.
                    debug!(
                        "[{}] '{}' received but did not render seq {}",
                        self.session_id, self.controller_id, sequence
                    );
                }
                let _ = out_tx.send(Outbound::Reply(Reply::received())).await;
            }
            ClientMessage::DiagnosticPong { .. } => {
                let _ = out_tx
                    .send(Outbound::Reply(Reply::diagnostic_received(unix_millis())))
                    .await;
            }
        }

        true
    }

    /// Strike accounting for malformed input: an error reply on the first
    /// offenses, termination on repeated offenses inside the window.
    async fn on_decode_error(
        &mut self,
        error: &serde_json::Error,
        out_tx: &mpsc::Sender<Outbound>,
    ) -> bool {
        let now = Instant::now();
        if now.duration_since(self.strike_window_start) > DECODE_STRIKE_WINDOW {
            self.strikes = 0;
            self.strike_window_start = now;
        }
        self.strikes += 1;

        if self.strikes >= DECODE_STRIKE_LIMIT {
            warn!(
                "[{}] '{}': {} malformed messages in {}s, terminating",
                self.session_id,
                self.controller_id,
                self.strikes,
                DECODE_STRIKE_WINDOW.as_secs()
            );
            let _ = out_tx
                .send(Outbound::Event(ServerMessage::Error {
                    code: ErrorCode::ProtocolViolation,
                    message: "too many malformed messages".into(),
                }))
                .await;
            return false;
        }

        debug!("[{}] malformed message: {}", self.session_id, error);
        let _ = out_tx
            .send(Outbound::Event(ServerMessage::Error {
                code: ErrorCode::InvalidMessage,
                message: format!("invalid JSON: {error}"),
            }))
            .await;
        true
    }
}
