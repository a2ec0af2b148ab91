// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module runs the background tasks of the gateway and handles their
//! lifecycle:
//!
//! - Modbus server (TCP or RTU) answering external masters
//! - Write-through worker mirroring zone writes on the secondary device
//! - Periodic health check of the durable register store
//! - Heartbeat logging the gateway status
//!
//! Every task watches a shared `running` flag. Tasks that block on I/O
//! (the Modbus server and the write-through worker) run inside a supervisor
//! that aborts them once the flag is cleared.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{Config, ModbusTransport};
use crate::gateway::GatewayCore;
use crate::modbus::{serve_rtu, serve_tcp, GatewayModbusServer};
use crate::store::RegisterStore;
use crate::write_through::{WriteThroughClient, WriteThroughQueue, WriteThroughWorker};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the gateway described by `config`.
///
/// Opens the durable register store, builds the bus (a memory bus starts from
/// the persisted registers) and, when enabled, the write-through queue. The returned worker must be spawned for mirrored
/// writes to reach the secondary device.
///
/// ### Errors
///
/// Fails when the register store cannot be opened or loaded, or when the
/// bus or write-through addresses are invalid. A store that cannot be opened
/// at startup is fatal.
pub fn build_gateway(config: &Config) -> Result<(Arc<GatewayCore>, Option<WriteThroughWorker>)> {
    info!("Opening register store at {:?}", config.storage.path);
    let store = RegisterStore::open_path(&config.storage.path, config.storage.store_options())
        .with_context(|| {
            format!(
                "Failed to open register store at {}",
                config.storage.path.display()
            )
        })?;

    let bus = config.bus.build(&store)?;
    info!("Heating bus: {}", bus.describe());

    let mut gateway = GatewayCore::new(bus, Arc::new(store), config.circuit_breaker.settings());

    let mut worker = None;
    if config.write_through.enabled {
        let options = config.write_through.options()?;
        info!(
            "Write-through enabled towards {} (slave {})",
            options.device, options.slave_id
        );
        let client = Arc::new(WriteThroughClient::new(options));
        let (queue, queue_worker) =
            WriteThroughQueue::new(client, config.write_through.queue_capacity);
        gateway = gateway.with_write_through(queue);
        worker = Some(queue_worker);
    }

    Ok((Arc::new(gateway), worker))
}

/// Coordinates the background services of the gateway.
///
/// # Fields
///
/// * `tasks` - Handles of running tasks for management and cleanup
/// * `running` - Flag shared between tasks to coordinate shutdown
/// * `gateway` - The gateway served by the tasks, once launched
/// * `modbus_addr` - Local address of the Modbus TCP server, once bound
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    gateway: Option<Arc<GatewayCore>>,
    modbus_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Examples
    ///
    /// ```
    /// use neasmart_gateway::daemon::Daemon;
    ///
    /// let daemon = Daemon::new();
    /// assert!(daemon.gateway().is_none());
    /// ```
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            gateway: None,
            modbus_addr: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// Builds the gateway with [`build_gateway`] and starts its services.
    ///
    /// ### Parameters
    ///
    /// * `config` - Application configuration
    ///
    /// ### Errors
    ///
    /// Fails when the gateway cannot be built or the Modbus TCP listener
    /// cannot be bound.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let (gateway, worker) = build_gateway(config)?;
        self.launch_with(config, gateway, worker).await
    }

    /// Launch the tasks around an already built gateway.
    pub async fn launch_with(
        &mut self,
        config: &Config,
        gateway: Arc<GatewayCore>,
        worker: Option<WriteThroughWorker>,
    ) -> Result<()> {
        self.gateway = Some(gateway.clone());

        if let Some(worker) = worker {
            self.start_write_through_worker(worker);
        }

        if config.modbus.enabled {
            self.start_modbus_server(config, gateway.clone()).await?;
        } else {
            info!("Modbus server disabled");
        }

        self.start_health_check(gateway.clone(), config.storage.health_check_interval());
        self.start_heartbeat(gateway);

        Ok(())
    }

    /// The gateway served by this daemon, once launched.
    pub fn gateway(&self) -> Option<&Arc<GatewayCore>> {
        self.gateway.as_ref()
    }

    /// Local address of the Modbus TCP server, once bound.
    pub fn modbus_addr(&self) -> Option<SocketAddr> {
        self.modbus_addr
    }

    /// Start the Modbus server on the configured transport.
    ///
    /// The TCP listener is bound before this returns so an unusable address
    /// fails the launch. The serial port is opened inside the task.
    async fn start_modbus_server(&mut self, config: &Config, gateway: Arc<GatewayCore>) -> Result<()> {
        let service = GatewayModbusServer::new(gateway, config.modbus.slave_id);

        let server_handle = match config.modbus.transport {
            ModbusTransport::Tcp => {
                let bind_addr = format!("{}:{}", config.modbus.address, config.modbus.port);
                info!("Starting modbus server on {}", bind_addr);
                let listener = TcpListener::bind(&bind_addr)
                    .await
                    .with_context(|| format!("Failed to bind Modbus server on {}", bind_addr))?;
                self.modbus_addr = Some(listener.local_addr()?);

                tokio::spawn(async move {
                    if let Err(e) = serve_tcp(listener, service).await {
                        error!("Modbus server error: {}", e);
                    }
                })
            }
            ModbusTransport::Serial => {
                let device = config.modbus.serial_device.clone();
                let baud_rate = config.modbus.baud_rate;
                info!("Starting modbus server on {} at {} baud", device, baud_rate);

                tokio::spawn(async move {
                    if let Err(e) = serve_rtu(&device, baud_rate, service).await {
                        error!("Modbus RTU server error on {}: {}", device, e);
                    }
                })
            }
        };

        self.supervise("Modbus server", server_handle);
        info!("Modbus server started");
        Ok(())
    }

    fn start_write_through_worker(&mut self, worker: WriteThroughWorker) {
        debug!("Starting write-through worker");
        let handle = tokio::spawn(worker.run());
        self.supervise("Write-through worker", handle);
    }

    /// Run the store health check every `interval`.
    ///
    /// The check itself is rate-limited by the store, and resynchronises the
    /// durable layer once it answers again.
    fn start_health_check(&mut self, gateway: Arc<GatewayCore>, interval: Duration) {
        debug!("Starting store health check every {:?}", interval);
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let interval = interval.max(POLL_INTERVAL);
            while sleep_while_running(&running, interval).await {
                let store: Arc<RegisterStore> = gateway.store().clone();
                let was_degraded = store.is_using_fallback();
                match tokio::task::spawn_blocking(move || store.health_check()).await {
                    Ok(true) if was_degraded => info!("Register store recovered"),
                    Ok(true) => debug!("Register store healthy"),
                    Ok(false) => warn!("Register store unavailable, serving from memory"),
                    Err(e) => error!("Store health check panicked: {}", e),
                }
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Start a heartbeat task that logs the gateway status periodically
    fn start_heartbeat(&mut self, gateway: Arc<GatewayCore>) {
        info!("Starting heartbeat monitor");
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while sleep_while_running(&running, HEARTBEAT_INTERVAL).await {
                let status = gateway.status();
                let summary = serde_json::to_string(&status)?;
                if status.using_fallback || status.failure_count > 0 {
                    warn!("Daemon heartbeat: degraded {}", summary);
                } else {
                    debug!("Daemon heartbeat: {}", summary);
                }
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Abort `handle` once the running flag is cleared.
    fn supervise(&mut self, name: &'static str, handle: JoinHandle<()>) {
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) && !handle.is_finished() {
                time::sleep(POLL_INTERVAL).await;
            }

            if handle.is_finished() {
                if running.load(Ordering::SeqCst) {
                    warn!("{} stopped unexpectedly", name);
                }
                return Ok(());
            }

            info!("Shutting down {}...", name);
            handle.abort();
            match time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(_) => info!("{} shut down successfully", name),
                Err(_) => warn!("{} shutdown timed out, forcing termination", name),
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    ///
    /// Call after [`Daemon::shutdown`]. A task that panicked or did not stop
    /// within five seconds is logged and skipped.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }
        Ok(())
    }
}

/// Sleep up to `duration`, waking every second to check `running`.
///
/// Returns `false` when the daemon is shutting down.
async fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(POLL_INTERVAL);
        time::sleep(step).await;
        remaining -= step;
    }
    running.load(Ordering::SeqCst)
}
