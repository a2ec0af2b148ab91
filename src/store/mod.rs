// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistent register store
//!
//! [`RegisterStore`] holds the value of every one of the 65536 holding
//! registers. Values live in a durable [`RegisterBackend`] and are mirrored in
//! an [`InMemoryFallback`] replica.
//!
//! ## Failure handling
//!
//! Every durable call runs under a [`RetryPolicy`]. When the retries are
//! exhausted:
//!
//! - with the fallback enabled, the store switches to the replica. Reads are
//!   served from it and writes are recorded there as dirty entries. The store
//!   stays degraded until a health check can reach the backend again and flush
//!   the dirty entries back to disk.
//! - with the fallback disabled, the call fails with [`StoreError::Unavailable`].
//!
//! Health checks are rate limited. They run from the daemon's periodic task and
//! opportunistically from any operation issued while degraded.
//!
//! ## Locking
//!
//! One lock serialises every operation on a store instance, including the
//! bounded retry window of durable I/O. The replica has its own lock, always
//! taken after the store lock.

pub mod backend;
pub mod fallback;
pub mod retry;

use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;

use crate::registers::{check_range, AddressError, REGISTER_COUNT};

pub use backend::{RedbBackend, RegisterBackend};
pub use fallback::InMemoryFallback;
pub use retry::RetryPolicy;

/// Errors raised by the register store and its durable layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A single durable-layer call failed.
    #[error("register storage error: {0}")]
    Backend(String),

    /// Retries were exhausted and the fallback is disabled.
    #[error("register storage unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error(transparent)]
    Address(#[from] AddressError),
}

macro_rules! backend_error_from {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    StoreError::Backend(err.to_string())
                }
            }
        )+
    };
}

backend_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Tuning knobs for [`RegisterStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub enable_fallback: bool,
    pub retry: RetryPolicy,
    /// Minimum time between two health checks.
    pub health_check_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            retry: RetryPolicy::default(),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Snapshot returned by [`RegisterStore::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub healthy: bool,
    pub using_fallback: bool,
    /// Entries in the durable layer, `None` when it could not be queried.
    pub durable_entries: Option<u64>,
    pub fallback_entries: usize,
    pub dirty_entries: usize,
}

#[derive(Debug)]
struct StoreState {
    healthy: bool,
    using_fallback: bool,
    last_health_check: Option<Instant>,
}

/// Durable, thread-safe map of the 65536 holding registers.
pub struct RegisterStore {
    backend: Box<dyn RegisterBackend>,
    fallback: InMemoryFallback,
    options: StoreOptions,
    state: Mutex<StoreState>,
}

impl RegisterStore {
    /// Open a redb-backed store at `path`.
    ///
    /// Failure to create or read the database is returned to the caller, which
    /// is expected to abort startup.
    pub fn open_path<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self, StoreError> {
        let backend = RedbBackend::open(path)?;
        Self::open(Box::new(backend), options)
    }

    /// Wrap a backend and load the full replica from it.
    pub fn open(
        backend: Box<dyn RegisterBackend>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let snapshot = options
            .retry
            .run("initial register load", || {
                backend.read_range(0, REGISTER_COUNT)
            })
            .map_err(|(attempts, err)| StoreError::Unavailable {
                attempts,
                last_error: err.to_string(),
            })?;
        info!("Loaded {} registers from durable storage", snapshot.len());

        Ok(Self {
            backend,
            fallback: InMemoryFallback::with_values(snapshot),
            options,
            state: Mutex::new(StoreState {
                healthy: true,
                using_fallback: false,
                last_health_check: None,
            }),
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Value of one register. Never-written registers read as 0.
    pub fn get(&self, addr: u16) -> Result<u16, StoreError> {
        let values = self.get_range(addr, 1)?;
        Ok(values.first().copied().unwrap_or_default())
    }

    /// Values of `count` consecutive registers.
    pub fn get_range(&self, start: u16, count: usize) -> Result<Vec<u16>, StoreError> {
        check_range(start, count)?;
        let mut state = self.state.lock();
        self.recover_if_degraded(&mut state);

        if !state.using_fallback {
            match self
                .options
                .retry
                .run("register read", || self.backend.read_range(start, count))
            {
                Ok(values) => {
                    self.fallback.refresh(start, &values);
                    return Ok(values);
                }
                Err((attempts, err)) => self.degrade(&mut state, attempts, err)?,
            }
        }

        Ok(self.fallback.get_range(start, count))
    }

    pub fn set(&self, addr: u16, value: u16) -> Result<(), StoreError> {
        self.set_range(addr, &[value])
    }

    /// Store consecutive registers starting at `start`.
    pub fn set_range(&self, start: u16, values: &[u16]) -> Result<(), StoreError> {
        check_range(start, values.len())?;
        let mut state = self.state.lock();
        self.recover_if_degraded(&mut state);

        if !state.using_fallback {
            match self
                .options
                .retry
                .run("register write", || self.backend.write_range(start, values))
            {
                Ok(()) => {
                    self.fallback.refresh(start, values);
                    return Ok(());
                }
                Err((attempts, err)) => self.degrade(&mut state, attempts, err)?,
            }
        }

        self.fallback.set_range(start, values);
        debug!(
            "Recorded {} register(s) at {} in fallback ({} dirty)",
            values.len(),
            start,
            self.fallback.dirty_count()
        );
        Ok(())
    }

    /// Probe the durable layer and flush dirty fallback entries to it.
    ///
    /// Rate limited by `health_check_interval`: a call inside the interval
    /// returns the last known health without touching the backend.
    pub fn health_check(&self) -> bool {
        let mut state = self.state.lock();
        self.check(&mut state);
        state.healthy
    }

    pub fn is_using_fallback(&self) -> bool {
        self.state.lock().using_fallback
    }

    pub fn status(&self) -> StoreStatus {
        let state = self.state.lock();
        let durable_entries = if state.using_fallback {
            None
        } else {
            self.backend.entry_count().ok()
        };
        StoreStatus {
            healthy: state.healthy,
            using_fallback: state.using_fallback,
            durable_entries,
            fallback_entries: self.fallback.len(),
            dirty_entries: self.fallback.dirty_count(),
        }
    }

    fn degrade(
        &self,
        state: &mut MutexGuard<'_, StoreState>,
        attempts: u32,
        err: StoreError,
    ) -> Result<(), StoreError> {
        state.healthy = false;
        if !self.options.enable_fallback {
            warn!("Register storage failed after {} attempts: {}", attempts, err);
            return Err(StoreError::Unavailable {
                attempts,
                last_error: err.to_string(),
            });
        }
        if !state.using_fallback {
            warn!(
                "Register storage failed after {} attempts ({}), switching to in-memory fallback",
                attempts, err
            );
            state.using_fallback = true;
            state.last_health_check = Some(Instant::now());
        }
        Ok(())
    }

    fn recover_if_degraded(&self, state: &mut MutexGuard<'_, StoreState>) {
        if state.using_fallback {
            self.check(state);
        }
    }

    fn check(&self, state: &mut MutexGuard<'_, StoreState>) {
        if let Some(last) = state.last_health_check {
            if last.elapsed() < self.options.health_check_interval {
                return;
            }
        }
        state.last_health_check = Some(Instant::now());

        if let Err(err) = self.backend.probe() {
            if state.healthy {
                warn!("Register storage health check failed: {}", err);
            } else {
                debug!("Register storage still unavailable: {}", err);
            }
            state.healthy = false;
            return;
        }

        let dirty = self.fallback.dirty_entries();
        if !dirty.is_empty() {
            if let Err(err) = self.backend.write_entries(&dirty) {
                warn!(
                    "Failed to resynchronise {} register(s) from fallback: {}",
                    dirty.len(),
                    err
                );
                state.healthy = false;
                return;
            }
            self.fallback.clear_dirty();
            info!("Resynchronised {} register(s) from fallback", dirty.len());
        }

        if state.using_fallback {
            info!("Register storage recovered, leaving in-memory fallback");
        }
        state.using_fallback = false;
        state.healthy = true;
    }
}
