// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory replica of the register space
//!
//! The replica mirrors every value the store has seen, so it can keep serving
//! last-known values when the durable layer is unavailable. Writes made while
//! degraded are tracked as dirty until they are flushed back to disk.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::registers::REGISTER_COUNT;

#[derive(Debug)]
struct Replica {
    values: Vec<u16>,
    dirty: BTreeSet<u16>,
}

/// Lock-protected, full-size register replica.
#[derive(Debug)]
pub struct InMemoryFallback {
    replica: Mutex<Replica>,
}

impl Default for InMemoryFallback {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFallback {
    /// Replica with every register at zero.
    pub fn new() -> Self {
        Self::with_values(Vec::new())
    }

    /// Replica seeded from a snapshot. Missing trailing registers are zero.
    pub fn with_values(mut values: Vec<u16>) -> Self {
        values.resize(REGISTER_COUNT, 0);
        Self {
            replica: Mutex::new(Replica {
                values,
                dirty: BTreeSet::new(),
            }),
        }
    }

    pub fn get(&self, addr: u16) -> u16 {
        self.replica.lock().values[usize::from(addr)]
    }

    /// Values of `count` registers from `start`, truncated at the end of the space.
    pub fn get_range(&self, start: u16, count: usize) -> Vec<u16> {
        let replica = self.replica.lock();
        let start = usize::from(start);
        let end = (start + count).min(REGISTER_COUNT);
        replica.values[start..end].to_vec()
    }

    /// Write a value that has not reached the durable layer.
    pub fn set(&self, addr: u16, value: u16) {
        self.set_range(addr, std::slice::from_ref(&value));
    }

    /// Write values that have not reached the durable layer.
    pub fn set_range(&self, start: u16, values: &[u16]) {
        let mut replica = self.replica.lock();
        for (addr, value) in (usize::from(start)..REGISTER_COUNT).zip(values) {
            replica.values[addr] = *value;
            replica.dirty.insert(addr as u16);
        }
    }

    /// Record values already persisted, without marking them dirty.
    pub fn refresh(&self, start: u16, values: &[u16]) {
        let mut replica = self.replica.lock();
        for (addr, value) in (usize::from(start)..REGISTER_COUNT).zip(values) {
            replica.values[addr] = *value;
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.replica.lock().dirty.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.replica.lock().dirty.len()
    }

    /// Snapshot of the unsynchronised `(address, value)` pairs, in address order.
    pub fn dirty_entries(&self) -> Vec<(u16, u16)> {
        let replica = self.replica.lock();
        replica
            .dirty
            .iter()
            .map(|addr| (*addr, replica.values[usize::from(*addr)]))
            .collect()
    }

    pub fn clear_dirty(&self) {
        self.replica.lock().dirty.clear();
    }

    pub fn len(&self) -> usize {
        self.replica.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
