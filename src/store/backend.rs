// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Durable key-value layer for holding registers
//!
//! The store talks to its durable layer through [`RegisterBackend`]. The
//! production implementation is [`RedbBackend`], an embedded redb database
//! holding one `u16 -> u16` table with an entry for every register address.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::StoreError;
use crate::registers::REGISTER_COUNT;

const REGISTERS_TABLE: TableDefinition<u16, u16> = TableDefinition::new("holding_registers");

/// Durable storage for register values.
///
/// Implementations must be usable from several threads. Every call is a
/// single, independent unit of I/O; retries are the caller's business.
#[cfg_attr(test, mockall::automock)]
pub trait RegisterBackend: Send + Sync {
    /// Read `count` consecutive registers. Missing entries read as zero.
    fn read_range(&self, start: u16, count: usize) -> Result<Vec<u16>, StoreError>;

    /// Write consecutive registers starting at `start`.
    fn write_range(&self, start: u16, values: &[u16]) -> Result<(), StoreError>;

    /// Write scattered `(address, value)` pairs in one transaction.
    fn write_entries(&self, entries: &[(u16, u16)]) -> Result<(), StoreError>;

    /// Cheap liveness check.
    fn probe(&self) -> Result<(), StoreError>;

    /// Number of stored entries.
    fn entry_count(&self) -> Result<u64, StoreError>;
}

/// redb-backed register storage.
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Open the database at `path`, creating and zero-filling it on first use.
    ///
    /// ### Errors
    ///
    /// Any failure here (permissions, full disk, corrupt file) is returned as-is.
    /// The daemon treats it as fatal.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating register database directory {:?}", parent);
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let db = Database::create(path)?;
        let backend = Self {
            db,
            path: path.to_path_buf(),
        };
        backend.initialize()?;
        debug!("Using register database at {:?}", backend.path);
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REGISTERS_TABLE)?;
            if table.len()? == 0 {
                warn!("Initialising register database at {:?}", self.path);
                for addr in 0..=u16::MAX {
                    table.insert(addr, 0)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl RegisterBackend for RedbBackend {
    fn read_range(&self, start: u16, count: usize) -> Result<Vec<u16>, StoreError> {
        let mut values = vec![0; count];
        if count == 0 {
            return Ok(values);
        }
        let end = (usize::from(start) + count - 1).min(REGISTER_COUNT - 1) as u16;

        let txn = self.db.begin_read()?;
        let table = txn.open_table(REGISTERS_TABLE)?;
        for entry in table.range(start..=end)? {
            let (key, value) = entry?;
            values[usize::from(key.value() - start)] = value.value();
        }
        Ok(values)
    }

    fn write_range(&self, start: u16, values: &[u16]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REGISTERS_TABLE)?;
            for (addr, value) in (usize::from(start)..REGISTER_COUNT).zip(values) {
                table.insert(addr as u16, *value)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn write_entries(&self, entries: &[(u16, u16)]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REGISTERS_TABLE)?;
            for (addr, value) in entries {
                table.insert(*addr, *value)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn probe(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REGISTERS_TABLE)?;
        table.get(0u16)?;
        Ok(())
    }

    fn entry_count(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REGISTERS_TABLE)?;
        Ok(table.len()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_open_zero_fills() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("data/registers.redb")).unwrap();
        assert_eq!(backend.entry_count().unwrap(), REGISTER_COUNT as u64);
        assert_eq!(backend.read_range(65_530, 6).unwrap(), vec![0; 6]);
        assert!(backend.probe().is_ok());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registers.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.write_range(1300, &[1, 0x0C33]).unwrap();
            backend.write_entries(&[(7, 99), (65_535, 5)]).unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.read_range(1300, 2).unwrap(), vec![1, 0x0C33]);
        assert_eq!(backend.read_range(7, 1).unwrap(), vec![99]);
        assert_eq!(backend.read_range(65_535, 1).unwrap(), vec![5]);
        assert_eq!(backend.entry_count().unwrap(), REGISTER_COUNT as u64);
    }
}
