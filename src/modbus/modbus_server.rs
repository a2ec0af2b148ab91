// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus slave implementation for the register gateway
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the gateway, answering
//! requests on behalf of the heating controller; the clients are the external masters.
//!
//! Every request goes through [`GatewayCore`], so external masters get the same
//! validation, circuit breaking and persistence as the rest of the gateway.

use std::{io, net::SocketAddr, sync::Arc};

use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

use crate::gateway::{GatewayCore, GatewayError};
use crate::registers::{check_range, SLAVE_ID_SECONDARY};

/// Largest register count a single read may ask for.
pub const MAX_READ_COUNT: u16 = 125;
/// Largest register count a single write may carry.
pub const MAX_WRITE_COUNT: usize = 123;

/// Modbus service answering for the primary slave id and the fixed secondary id.
#[derive(Clone)]
pub struct GatewayModbusServer {
    gateway: Arc<GatewayCore>,
    slave_ids: [u8; 2],
}

impl GatewayModbusServer {
    pub fn new(gateway: Arc<GatewayCore>, primary_slave_id: u8) -> Self {
        Self {
            gateway,
            slave_ids: [primary_slave_id, SLAVE_ID_SECONDARY],
        }
    }

    /// Whether requests addressed to `slave` are answered.
    pub fn serves(&self, slave: u8) -> bool {
        self.slave_ids.contains(&slave)
    }
}

impl tokio_modbus::server::Service for GatewayModbusServer {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        if !self.serves(slave) {
            warn!("SERVER: request for unknown slave id {}", slave);
            return Box::pin(futures::future::ready(Err(
                ExceptionCode::GatewayTargetDevice,
            )));
        }

        let gateway = self.gateway.clone();
        Box::pin(async move {
            match request {
                Request::ReadHoldingRegisters(addr, cnt) => {
                    read_holding(&gateway, addr, cnt).await.map(Response::ReadHoldingRegisters)
                }
                Request::WriteSingleRegister(addr, value) => {
                    write_holding(&gateway, addr, std::slice::from_ref(&value))
                        .await
                        .map(|_| Response::WriteSingleRegister(addr, value))
                }
                Request::WriteMultipleRegisters(addr, values) => {
                    if values.is_empty() || values.len() > MAX_WRITE_COUNT {
                        return Err(ExceptionCode::IllegalDataValue);
                    }
                    write_holding(&gateway, addr, &values)
                        .await
                        .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
                }
                _ => {
                    error!("SERVER: Exception::IllegalFunction - Unimplemented function code in request: {request:?}");
                    Err(ExceptionCode::IllegalFunction)
                }
            }
        })
    }
}

async fn read_holding(
    gateway: &GatewayCore,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    if cnt == 0 || cnt > MAX_READ_COUNT {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if check_range(addr, usize::from(cnt)).is_err() {
        error!("SERVER: Exception::IllegalDataAddress");
        return Err(ExceptionCode::IllegalDataAddress);
    }
    gateway.read(addr, cnt, true).await.map_err(|err| {
        error!("SERVER: read of {} register(s) at {} failed: {}", cnt, addr, err);
        exception_for(&err)
    })
}

/// Writes are acknowledged once persisted, even if the bus write failed.
async fn write_holding(
    gateway: &GatewayCore,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    if check_range(addr, values.len()).is_err() {
        error!("SERVER: Exception::IllegalDataAddress");
        return Err(ExceptionCode::IllegalDataAddress);
    }
    match gateway.write(addr, values).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_persisted_locally() => {
            debug!("SERVER: write at {} persisted locally only: {}", addr, err);
            Ok(())
        }
        Err(err) => {
            error!("SERVER: write at {} failed: {}", addr, err);
            Err(exception_for(&err))
        }
    }
}

fn exception_for(err: &GatewayError) -> ExceptionCode {
    match err {
        GatewayError::Address(_) => ExceptionCode::IllegalDataAddress,
        GatewayError::Codec(_) => ExceptionCode::IllegalDataValue,
        GatewayError::Store(_) | GatewayError::CircuitOpen | GatewayError::Bus(_) => {
            ExceptionCode::ServerDeviceFailure
        }
    }
}

/// Serve Modbus TCP on `listener` until the task is aborted.
pub async fn serve_tcp(listener: TcpListener, service: GatewayModbusServer) -> io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Modbus TCP server listening on {}", local_addr);

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr: SocketAddr| {
        let service = service.clone();
        async move {
            debug!("Modbus client connected from {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, |_| Ok(Some(service.clone())))
        }
    };
    let on_process_error = |err| {
        error!("Modbus server error: {}", err);
    };

    server.serve(&on_connected, on_process_error).await
}

/// Serve Modbus RTU on a serial line, 8N1.
pub async fn serve_rtu(
    device: &str,
    baud_rate: u32,
    service: GatewayModbusServer,
) -> io::Result<()> {
    let builder = tokio_serial::new(device, baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None);
    let serial = SerialStream::open(&builder)?;
    info!("Modbus RTU server listening on {} at {} baud", device, baud_rate);

    let server = tokio_modbus::server::rtu::Server::new(serial);
    server.serve_forever(service).await
}
