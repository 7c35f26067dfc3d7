//! Synchronous primitives for the Jablotron Volta controller.
//!
//! This module provides a low-level, stateless API (`Volta` struct) over any
//! [`SyncTransport`]: single block reads and writes, the authentication handshake,
//! gap-filled reads of one [`ReadStep`] and the second circuit presence check.
//! It keeps no session state; authentication tracking lives in
//! [`crate::tokio_sync_safe_client`].
//!
//! # Example
//!
//! ```no_run
//! use volta_lib::register_map::{Field, RegisterType};
//! use volta_lib::tokio_sync::Volta;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.1.50:502".parse()?;
//!     let mut ctx = tokio_modbus::client::sync::tcp::connect(socket_addr)?;
//!
//!     // Input registers need no handshake.
//!     let cpu = Volta::read_field(&mut ctx, Field::CpuTemperature)?;
//!     println!("CPU temperature: {cpu}");
//!
//!     // Settings live in the protected window.
//!     Volta::authenticate(&mut ctx)?;
//!     let block = Volta::read_block(&mut ctx, RegisterType::Holding, 1100, 5)?;
//!     println!("DHW settings: {block:?}");
//!     Ok(())
//! }
//! ```

use crate::{
    protocol::{self as proto, Quantity},
    register_map::{Field, ReadStep, RegisterType},
    tokio_common::{Error, Result, SyncTransport},
};
use log::*;

/// Stateless operations on a Volta controller.
///
/// All methods block the current thread for at most the transport timeout.
#[derive(Debug)]
pub struct Volta;

impl Volta {
    /// Reads `quantity` registers starting at `address`.
    ///
    /// # Errors
    ///
    /// * [`Error::TokioError`] or [`Error::TokioExceptionError`] if the transaction fails.
    /// * [`Error::ShortResponse`] if the device returns fewer registers than requested.
    pub fn read_block<T: SyncTransport + ?Sized>(
        transport: &mut T,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        debug!("Reading {quantity} {register_type} registers at {address}");
        let registers = transport.read(register_type, address, quantity)?;
        if registers.len() < quantity as usize {
            return Err(Error::ShortResponse {
                expected: quantity as usize,
                actual: registers.len(),
            });
        }
        Ok(registers)
    }

    /// Writes one holding register.
    pub fn write_register<T: SyncTransport + ?Sized>(
        transport: &mut T,
        address: u16,
        value: u16,
    ) -> Result<()> {
        debug!("Writing {value} to holding register {address}");
        transport.write_single(address, value)
    }

    /// Performs the authentication handshake that unlocks the protected holding registers
    /// for the rest of the connection.
    pub fn authenticate<T: SyncTransport + ?Sized>(transport: &mut T) -> Result<()> {
        Self::write_register(transport, proto::AUTH_REG_ADDR, proto::AUTH_PASSWORD)
    }

    /// Reads a single field from its own registers.
    ///
    /// Protected fields need a prior [`Self::authenticate`].
    pub fn read_field<T: SyncTransport + ?Sized>(
        transport: &mut T,
        field: Field,
    ) -> Result<Quantity> {
        let descriptor = field.descriptor()?;
        let width = descriptor.codec.width();
        let registers = Self::read_block(
            transport,
            descriptor.register_type(),
            descriptor.address(),
            width as u16,
        )?;
        descriptor
            .decode_value(&registers)
            .ok_or(Error::ShortResponse {
                expected: width,
                actual: registers.len(),
            })
    }

    /// Encodes and writes a single field. Declared limits are not enforced.
    pub fn write_field<T: SyncTransport + ?Sized>(
        transport: &mut T,
        field: Field,
        value: &Quantity,
    ) -> Result<()> {
        let descriptor = field.descriptor()?;
        let raw = descriptor.encode(value)?;
        Self::write_register(transport, descriptor.address(), raw)
    }

    /// Reads every segment of a read step through `read` and joins them into one block.
    ///
    /// Registers between segments are filled with zeros so that group indices stay
    /// stable. Fails on the first failing segment.
    pub fn read_step<F>(step: &ReadStep, mut read: F) -> Result<Vec<u16>>
    where
        F: FnMut(RegisterType, u16, u16) -> Result<Vec<u16>>,
    {
        let start = step.address();
        let mut block = vec![0; step.span_len()];
        for segment in step.segments {
            let registers = read(step.register_type, segment.address, segment.quantity)?;
            let offset = (segment.address - start) as usize;
            let len = (segment.quantity as usize).min(registers.len());
            block[offset..offset + len].copy_from_slice(&registers[..len]);
        }
        Ok(block)
    }

    /// Returns `true` if a presence block shows no hardware: all registers zero or all
    /// `0xFFFF`.
    pub fn is_absent(registers: &[u16]) -> bool {
        registers.iter().all(|reg| *reg == 0) || registers.iter().all(|reg| *reg == u16::MAX)
    }
}
