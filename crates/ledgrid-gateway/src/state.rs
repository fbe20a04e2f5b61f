// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! Shared application state: the delivery core plus connection accounting.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::info;

use ledgrid::{BufferHandle, ControllerInterface, DeliveryConfig, EventBus, FrameBuffer};

/// Gateway options not covered by [`DeliveryConfig`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum concurrent controller sessions.
    pub max_clients: usize,
    /// Also push legacy single-frame `display` events alongside batches.
    pub legacy_frames: bool,
}

/// Shared application state.
pub struct AppState {
    pub config: DeliveryConfig,
    pub options: ServerOptions,
    pub bus: Arc<EventBus>,
    pub buffer: BufferHandle,
    pub interface: Arc<ControllerInterface>,
    client_count: RwLock<usize>,
    started_at: Instant,
}

impl AppState {
    /// Wire up the delivery core: bus, buffer actor, interface.
    pub fn new(config: DeliveryConfig, options: ServerOptions) -> Self {
        let bus = Arc::new(EventBus::new());
        let buffer = FrameBuffer::spawn(config.clone());
        let interface = ControllerInterface::new(bus.clone(), buffer.clone());
        interface.spawn();

        Self {
            config,
            options,
            bus,
            buffer,
            interface,
            client_count: RwLock::new(0),
            started_at: Instant::now(),
        }
    }

    pub async fn can_accept_client(&self) -> bool {
        *self.client_count.read().await < self.options.max_clients
    }

    pub async fn add_client(&self) {
        let mut count = self.client_count.write().await;
        *count += 1;
        info!("Controller connected. Total: {}", *count);
    }

    pub async fn remove_client(&self) {
        let mut count = self.client_count.write().await;
        *count = count.saturating_sub(1);
        info!("Controller disconnected. Total: {}", *count);
    }

    pub async fn client_count(&self) -> usize {
        *self.client_count.read().await
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
