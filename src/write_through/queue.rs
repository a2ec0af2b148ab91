// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Background dispatch of write-through mirrors
//!
//! Local writes are acknowledged as soon as they are persisted. The mirror
//! on the device is pushed onto a bounded channel and performed by a single
//! worker task, whose outcome is only logged.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::client::{WriteThroughClient, WriteThroughError};

/// A register write to repeat on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub addr: u16,
    pub value: u16,
}

/// Producer side, cheap to clone.
#[derive(Clone)]
pub struct WriteThroughQueue {
    sender: mpsc::Sender<WriteRequest>,
    client: Arc<WriteThroughClient>,
}

/// Consumer side, run it with [`WriteThroughWorker::run`].
pub struct WriteThroughWorker {
    receiver: mpsc::Receiver<WriteRequest>,
    client: Arc<WriteThroughClient>,
}

impl WriteThroughQueue {
    /// Create a queue holding at most `capacity` pending mirrors.
    pub fn new(client: Arc<WriteThroughClient>, capacity: usize) -> (Self, WriteThroughWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                client: client.clone(),
            },
            WriteThroughWorker { receiver, client },
        )
    }

    pub fn client(&self) -> &Arc<WriteThroughClient> {
        &self.client
    }

    /// Queue a mirror without waiting.
    ///
    /// Returns `false` when the request was not queued: write-through is
    /// disabled, the queue is full or the worker has stopped.
    pub fn enqueue(&self, addr: u16, value: u16) -> bool {
        if !self.client.is_enabled() {
            debug!("Write-through disabled, not mirroring register {}", addr);
            return false;
        }
        match self.sender.try_send(WriteRequest { addr, value }) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                warn!(
                    "Write-through queue full, dropping mirror of register {}",
                    request.addr
                );
                false
            }
            Err(TrySendError::Closed(request)) => {
                warn!(
                    "Write-through worker stopped, dropping mirror of register {}",
                    request.addr
                );
                false
            }
        }
    }
}

impl WriteThroughWorker {
    /// Process mirrors until every [`WriteThroughQueue`] handle is dropped.
    pub async fn run(mut self) {
        info!("Write-through worker started");
        while let Some(request) = self.receiver.recv().await {
            match self.client.write_register(request.addr, request.value).await {
                Ok(()) => {}
                Err(WriteThroughError::Disabled) => {
                    debug!("Write-through disabled, skipped register {}", request.addr)
                }
                Err(err) => warn!(
                    "Could not mirror register {} = {}: {}",
                    request.addr, request.value, err
                ),
            }
        }
        self.client.close().await;
        info!("Write-through worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_through::WriteThroughOptions;

    #[tokio::test]
    async fn test_disabled_client_is_not_queued() {
        let client = Arc::new(WriteThroughClient::new(WriteThroughOptions::default()));
        let (queue, _worker) = WriteThroughQueue::new(client, 4);
        assert!(!queue.enqueue(1301, 0x0C33));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let options = WriteThroughOptions {
            enabled: true,
            ..WriteThroughOptions::default()
        };
        let client = Arc::new(WriteThroughClient::new(options));
        // No worker running, so nothing drains the channel
        let (queue, worker) = WriteThroughQueue::new(client, 2);
        assert!(queue.enqueue(1, 1));
        assert!(queue.enqueue(2, 2));
        assert!(!queue.enqueue(3, 3));

        drop(worker);
        assert!(!queue.enqueue(4, 4));
    }
}
