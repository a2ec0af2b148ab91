// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the register gateway
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the gateway. The configuration is backed by a
//! YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The configuration is organized as a nested structure with sections:
//! - `modbus`: Modbus server exposed to external masters
//! - `bus`: How the heating controller is reached
//! - `storage`: Durable register store and its fallback
//! - `circuit_breaker`: Fault isolation around bus access
//! - `write_through`: Mirroring of zone writes on the secondary device
//!
//! ## Usage
//!
//! ```no_run
//! use neasmart_gateway::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some(true),                     // Enable Modbus
//!     Some("0.0.0.0".to_string()),    // Modbus address
//!     Some(5020),                     // Modbus port
//!     None,                           // Storage path
//! );
//!
//! println!("Modbus port: {}", config.modbus.port);
//! ```

pub mod bus;
pub mod circuit_breaker;
pub mod modbus;
pub mod storage;
pub mod utils;
pub mod write_through;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use bus::{BusConfig, BusKind};
pub use circuit_breaker::CircuitBreakerConfig;
pub use modbus::{ModbusConfig, ModbusTransport};
pub use storage::StorageConfig;
pub use utils::{is_valid_ip_address, output_config_schema};
pub use write_through::{WriteThroughConfig, WriteThroughFallbackConfig};

/// Root configuration structure for the gateway.
///
/// # Default Values
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Modbus server settings.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Heating bus access.
    #[serde(default)]
    pub bus: BusConfig,

    /// Durable register storage.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Write-through to the secondary device.
    #[serde(default)]
    pub write_through: WriteThroughConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        // Create parent directories if they don't exist
        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                std::fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails schema validation, deserialization or the additional rules of
    /// [`utils::validate_specific_rules`] is rejected, and a sample file with
    /// default values is written next to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // An empty document is an empty mapping
        let json_value = match serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })? {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            value => value,
        };

        let validator = utils::schema_validator()?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_json::from_value(json_value) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        // Perform additional specific validations
        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `modbus_enabled` - Optional flag to enable/disable the Modbus server
    /// * `modbus_address` - Optional network address for the Modbus server
    /// * `modbus_port` - Optional TCP port for the Modbus server
    /// * `storage_path` - Optional path of the register database
    pub fn apply_args(
        &mut self,
        modbus_enabled: Option<bool>,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        storage_path: Option<PathBuf>,
    ) {
        if let Some(enabled) = modbus_enabled {
            debug!("Overriding Modbus enabled from command line: {}", enabled);
            self.modbus.enabled = enabled;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(path) = storage_path {
            debug!("Overriding storage path from command line: {:?}", path);
            self.storage.path = path;
        }
    }
}
