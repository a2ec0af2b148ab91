// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Lazily connected Modbus client
//!
//! [`ModbusConnection`] owns at most one tokio-modbus client context. The
//! context is created on first use, reused afterwards and dropped after any
//! transport error or timeout so the next request reconnects. A mutex
//! serialises connection setup and requests on the shared context.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

/// Where a Modbus device can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    /// RTU over a serial line, 8N1.
    Serial { device: String, baud_rate: u32 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Serial { device, baud_rate } => write!(f, "{}@{}", device, baud_rate),
        }
    }
}

/// Failure of a single client request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device answered with exception {0:?}")]
    Exception(ExceptionCode),
}

/// One shared, lazily established client context.
pub struct ModbusConnection {
    endpoint: Endpoint,
    slave: Slave,
    timeout: Duration,
    context: Mutex<Option<Context>>,
}

impl ModbusConnection {
    /// ### Parameters
    ///
    /// * `endpoint` - Device address
    /// * `slave_id` - Unit identifier put on every request
    /// * `timeout` - Bound on connection setup and on each request
    pub fn new(endpoint: Endpoint, slave_id: u8, timeout: Duration) -> Self {
        Self {
            endpoint,
            slave: Slave(slave_id),
            timeout,
            context: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn is_connected(&self) -> bool {
        self.context.lock().await.is_some()
    }

    /// Drop the current context, if any.
    pub async fn disconnect(&self) {
        if self.context.lock().await.take().is_some() {
            debug!("Dropped Modbus connection to {}", self.endpoint);
        }
    }

    pub async fn read_holding_registers(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let mut slot = self.context.lock().await;
        let ctx = self.ensure_connected(&mut slot).await?;
        let result = timeout(self.timeout, ctx.read_holding_registers(start, count)).await;
        self.complete(&mut slot, result)
    }

    pub async fn write_single_register(&self, addr: u16, value: u16) -> Result<(), RequestError> {
        let mut slot = self.context.lock().await;
        let ctx = self.ensure_connected(&mut slot).await?;
        let result = timeout(self.timeout, ctx.write_single_register(addr, value)).await;
        self.complete(&mut slot, result)
    }

    pub async fn write_multiple_registers(
        &self,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let mut slot = self.context.lock().await;
        let ctx = self.ensure_connected(&mut slot).await?;
        let result = timeout(self.timeout, ctx.write_multiple_registers(start, values)).await;
        self.complete(&mut slot, result)
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Context>,
    ) -> Result<&'a mut Context, RequestError> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
            info!("Connected to Modbus device at {}", self.endpoint);
        }
        slot.as_mut().ok_or_else(|| RequestError::Connect {
            endpoint: self.endpoint.to_string(),
            reason: "no client context".to_string(),
        })
    }

    async fn connect(&self) -> Result<Context, RequestError> {
        let connect_error = |reason: String| RequestError::Connect {
            endpoint: self.endpoint.to_string(),
            reason,
        };

        match &self.endpoint {
            Endpoint::Tcp(addr) => timeout(self.timeout, tcp::connect_slave(*addr, self.slave))
                .await
                .map_err(|_| connect_error(format!("timed out after {:?}", self.timeout)))?
                .map_err(|e| connect_error(e.to_string())),
            Endpoint::Serial { device, baud_rate } => {
                let builder = tokio_serial::new(device.as_str(), *baud_rate)
                    .data_bits(DataBits::Eight)
                    .stop_bits(StopBits::One)
                    .parity(Parity::None)
                    .flow_control(FlowControl::None);
                let port = SerialStream::open(&builder).map_err(|e| connect_error(e.to_string()))?;
                Ok(rtu::attach_slave(port, self.slave))
            }
        }
    }

    fn complete<T>(
        &self,
        slot: &mut Option<Context>,
        result: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T, RequestError> {
        match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(code))) => Err(RequestError::Exception(code)),
            Ok(Err(err)) => {
                *slot = None;
                Err(RequestError::Transport(err.to_string()))
            }
            Err(_) => {
                *slot = None;
                Err(RequestError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let tcp = Endpoint::Tcp("192.168.1.200:502".parse().unwrap());
        assert_eq!(tcp.to_string(), "tcp://192.168.1.200:502");
        let serial = Endpoint::Serial {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 38_400,
        };
        assert_eq!(serial.to_string(), "/dev/ttyUSB0@38400");
    }

    #[tokio::test]
    async fn test_unreachable_device_reports_connect_error() {
        // Bind then drop a listener to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connection =
            ModbusConnection::new(Endpoint::Tcp(addr), 1, Duration::from_millis(500));
        let err = connection.read_holding_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, RequestError::Connect { .. }));
        assert!(!connection.is_connected().await);
    }
}
