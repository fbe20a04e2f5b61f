// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors
//
// End-to-end delivery scenarios against the frame buffer actor: priming,
// pattern preemption, debounce, backpressure, bounded memory, and session
// rejoin. Sessions are stood in for by plain mpsc mailboxes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use ledgrid::buffer::BATCH_MAILBOX_CAPACITY;
use ledgrid::{decode_batch, BufferHandle, DeliveryConfig, Frame, FrameBuffer, OutboundBatch};

fn test_config() -> DeliveryConfig {
    DeliveryConfig {
        max_delay_ms: 100,
        ..DeliveryConfig::default()
    }
}

fn rgb(id: u32) -> Frame {
    Frame::new(id, 2, 2, vec![id as u8; 12]).expect("valid frame")
}

async fn attach(
    buffer: &BufferHandle,
    controller_id: &str,
) -> mpsc::Receiver<OutboundBatch> {
    let (tx, rx) = mpsc::channel(BATCH_MAILBOX_CAPACITY);
    buffer
        .register_controller(controller_id, tx)
        .await
        .expect("register");
    rx
}

async fn expect_batch(rx: &mut mpsc::Receiver<OutboundBatch>) -> OutboundBatch {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("batch within 500ms")
        .expect("mailbox open")
}

#[tokio::test]
async fn urgent_request_primes_first_batch() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    for id in 0..10 {
        buffer
            .add_frame(rgb(id), "aurora", id == 0)
            .await
            .expect("add");
    }
    buffer
        .batch_request("c1", 0, 60, true)
        .await
        .expect("request");

    let batch = expect_batch(&mut mailbox).await;
    assert_eq!(batch.sequence, 1);
    assert!(batch.priority);
    assert!(batch.frame_count <= 10);

    let envelope = decode_batch(&batch.payload).expect("valid wire bytes");
    assert_eq!(envelope.sequence, 1);
    assert_eq!(envelope.frames.len(), batch.frame_count);
}

#[tokio::test]
async fn sequences_are_contiguous_per_controller() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    for round in 1..=3u32 {
        for id in 0..6 {
            buffer
                .add_frame(rgb(round * 100 + id), "aurora", false)
                .await
                .expect("add");
        }
        buffer
            .batch_request("c1", round - 1, 60, true)
            .await
            .expect("request");
        let batch = expect_batch(&mut mailbox).await;
        assert_eq!(batch.sequence, round);
    }
}

#[tokio::test]
async fn pattern_switch_preempts_without_reordering() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    // Steady state on pattern A, frames queued but not yet requested.
    for id in [8, 9, 10] {
        buffer.add_frame(rgb(id), "a", false).await.expect("add");
    }
    // Pattern switch: first frame of B arrives with the priority hint.
    buffer.add_frame(rgb(100), "b", true).await.expect("add");

    buffer
        .batch_request("c1", 0, 60, true)
        .await
        .expect("request");

    let batch = expect_batch(&mut mailbox).await;
    assert_eq!(batch.sequence, 1);
    assert!(batch.priority);

    // Leftover A-frames drain ahead of B's first frame; no A-frame follows
    // a B-frame.
    let envelope = decode_batch(&batch.payload).expect("decode");
    let ids: Vec<u32> = envelope.frames.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![8, 9, 10, 100]);
}

#[tokio::test]
async fn rapid_requests_are_debounced() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    for id in 0..6 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    // Two non-urgent requests back to back: the second is inside the
    // 50 ms debounce window.
    buffer
        .batch_request("c1", 0, 60, false)
        .await
        .expect("request");
    buffer
        .batch_request("c1", 0, 60, false)
        .await
        .expect("request");

    let first = expect_batch(&mut mailbox).await;
    assert_eq!(first.sequence, 1);

    // No second batch appears.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(mailbox.try_recv().is_err());

    let snapshot = buffer.status().await.expect("status");
    assert_eq!(snapshot.requests_debounced, 1);
}

#[tokio::test]
async fn full_controller_caps_every_batch() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut c1 = attach(&buffer, "c1").await;
    let mut c2 = attach(&buffer, "c2").await;

    buffer
        .controller_report("c1", 0.9, true, 0, 30.0)
        .await
        .expect("report");
    buffer
        .controller_report("c2", 0.3, true, 0, 60.0)
        .await
        .expect("report");

    for id in 0..200 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    buffer.batch_request("c1", 0, 100, true).await.expect("request");
    buffer.batch_request("c2", 0, 100, true).await.expect("request");

    // The slowest controller (fullness 0.9) caps everyone at 30.
    assert!(expect_batch(&mut c1).await.frame_count <= 30);
    assert!(expect_batch(&mut c2).await.frame_count <= 30);

    // c1 catches up: the cap rises.
    buffer
        .controller_report("c1", 0.3, true, 1, 60.0)
        .await
        .expect("report");
    buffer.batch_request("c1", 1, 200, true).await.expect("request");

    let relaxed = expect_batch(&mut c1).await;
    assert!(relaxed.frame_count > 30);
}

#[tokio::test]
async fn queue_never_exceeds_hard_cap() {
    let config = DeliveryConfig {
        batch_size_max: 20,
        max_buffered: 40,
        ..DeliveryConfig::default()
    };
    let buffer = FrameBuffer::spawn(config);

    for id in 0..200 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    let snapshot = buffer.status().await.expect("status");
    assert!(snapshot.priority_frames + snapshot.regular_frames <= 40);
    assert!(snapshot.frames_dropped >= 160);
}

#[tokio::test]
async fn repeated_reports_are_idempotent() {
    let buffer = FrameBuffer::spawn(test_config());
    let _mailbox = attach(&buffer, "c1").await;

    for id in 0..8 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    buffer
        .controller_report("c1", 0.7, true, 0, 30.0)
        .await
        .expect("report");
    let first = buffer.status().await.expect("status");

    buffer
        .controller_report("c1", 0.7, true, 0, 30.0)
        .await
        .expect("report");
    let second = buffer.status().await.expect("status");

    assert_eq!(first.dynamic_batch_size, second.dynamic_batch_size);
    assert_eq!(first.priority_frames, second.priority_frames);
    assert_eq!(first.regular_frames, second.regular_frames);
}

#[tokio::test]
async fn no_batch_is_sent_without_a_request() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    for id in 0..20 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    // Frames queued, auto-flush ticking, but no pull request: nothing moves.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(mailbox.try_recv().is_err());
}

#[tokio::test]
async fn empty_queue_request_is_served_later_by_autoflush() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    // Request arrives before any frames exist.
    buffer.batch_request("c1", 0, 60, true).await.expect("request");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(mailbox.try_recv().is_err());

    // Frames arrive; the pending request is serviced by the flush timer.
    for id in 0..6 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }
    let batch = expect_batch(&mut mailbox).await;
    assert_eq!(batch.sequence, 1);
}

#[tokio::test]
async fn rejoin_resets_sequence() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    for id in 0..6 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }
    buffer.batch_request("c1", 0, 60, true).await.expect("request");
    assert_eq!(expect_batch(&mut mailbox).await.sequence, 1);

    // Session dies; the record is removed.
    buffer.unregister_controller("c1").await.expect("unregister");
    drop(mailbox);

    // Fresh join with the same id starts over at sequence 1.
    let mut mailbox = attach(&buffer, "c1").await;
    for id in 10..16 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }
    buffer.batch_request("c1", 0, 60, true).await.expect("request");
    assert_eq!(expect_batch(&mut mailbox).await.sequence, 1);
}

#[tokio::test]
async fn hungry_controller_triggers_proactive_flush() {
    let buffer = FrameBuffer::spawn(test_config());
    let mut mailbox = attach(&buffer, "c1").await;

    // Non-urgent request parked (queue below min_flush_frames).
    buffer.batch_request("c1", 0, 60, false).await.expect("request");
    for id in 0..8 {
        buffer.add_frame(rgb(id), "aurora", false).await.expect("add");
    }

    // A hungry report flushes the pending request without waiting for the
    // timer.
    buffer
        .controller_report("c1", 0.1, true, 0, 60.0)
        .await
        .expect("report");

    let batch = expect_batch(&mut mailbox).await;
    assert_eq!(batch.sequence, 1);
    assert_eq!(batch.frame_count, 8);
}
