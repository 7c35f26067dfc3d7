//! This module provides common data structures and error types for the `tokio`
//! based clients.
//!
//! It defines the `Error` enum, which encapsulates all possible communication errors,
//! the [`SyncTransport`] seam the clients are written against and the
//! [`TcpConnector`] opening Modbus-TCP sessions.
use crate::{protocol as proto, register_map::RegisterType};
use std::{net::SocketAddr, time::Duration};
use tokio_modbus::{
    client::sync::Context,
    prelude::{SyncReader, SyncWriter},
    Slave,
};

/// Represents all possible errors that can occur during Modbus communication.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// Wraps `tokio_modbus::ExceptionCode`.
    #[error(transparent)]
    TokioExceptionError(#[from] tokio_modbus::ExceptionCode),

    /// Wraps `tokio_modbus::Error`.
    #[error(transparent)]
    TokioError(#[from] tokio_modbus::Error),

    /// The socket could not be opened.
    #[error("Cannot connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The operation needs an open session.
    #[error("Not connected")]
    NotConnected,

    /// The device answered with fewer registers than requested.
    #[error("Expected {expected} registers, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// Not a single register batch could be read.
    #[error("No register batch could be read")]
    NoData,
}

/// The result type for tokio operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// Helper function to map tokio result to our result.
fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
    match result {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.into()), // Modbus exception
        Err(err) => Err(err.into()),     // IO error
    }
}

/// Blocking register access, one outstanding transaction at a time.
pub trait SyncTransport {
    fn read_input(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>>;

    fn read_holding(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>>;

    fn write_single(&mut self, address: u16, value: u16) -> Result<()>;

    fn read(
        &mut self,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        match register_type {
            RegisterType::Input => self.read_input(address, quantity),
            RegisterType::Holding => self.read_holding(address, quantity),
        }
    }
}

impl SyncTransport for Context {
    fn read_input(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        map_tokio_result(self.read_input_registers(address, quantity))
    }

    fn read_holding(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        map_tokio_result(self.read_holding_registers(address, quantity))
    }

    fn write_single(&mut self, address: u16, value: u16) -> Result<()> {
        map_tokio_result(self.write_single_register(address, value))
    }
}

/// Opens transport sessions. A new session starts unauthenticated.
pub trait Connector {
    type Transport: SyncTransport;

    fn connect(&self) -> Result<Self::Transport>;

    /// Human readable peer, used in logs and errors.
    fn endpoint(&self) -> String;
}

/// Opens Modbus-TCP sessions to one controller.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    socket_addr: SocketAddr,
    slave: Slave,
    timeout: Option<Duration>,
}

impl TcpConnector {
    /// Creates a connector with the default 5 second socket timeout.
    pub fn new(socket_addr: SocketAddr, device_id: u8) -> Self {
        Self {
            socket_addr,
            slave: Slave(device_id),
            timeout: Some(proto::DEFAULT_TIMEOUT),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }
}

impl Connector for TcpConnector {
    type Transport = Context;

    fn connect(&self) -> Result<Context> {
        let mut ctx = tokio_modbus::client::sync::tcp::connect_slave_with_timeout(
            self.socket_addr,
            self.slave,
            self.timeout,
        )
        .map_err(|source| Error::Connect {
            endpoint: self.endpoint(),
            source,
        })?;
        ctx.set_timeout(self.timeout);
        Ok(ctx)
    }

    fn endpoint(&self) -> String {
        format!("{} (device {})", self.socket_addr, self.slave)
    }
}
