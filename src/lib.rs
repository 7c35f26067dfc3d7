//! A library for reading and configuring Jablotron Volta heating controllers via Modbus-TCP.
//!
//! The crate is layered bottom-up:
//!
//! 1.  **Register codec** ([`protocol`]): pure conversions between raw 16-bit registers
//!     and physical quantities (scaled temperatures, signed values, IPv4/MAC addresses,
//!     32-bit counters, versions).
//! 2.  **Register map** ([`register_map`]): a closed set of [`register_map::Field`]s, each
//!     bound to a batch group, an index, a codec, a unit and access rights, plus the
//!     batched read plan.
//! 3.  **Transport client**: stateless primitives in [`tokio_sync`] and the stateful,
//!     thread-safe [`tokio_sync_safe_client::SafeClient`] which authenticates lazily for
//!     the protected holding registers and tolerates failing batches.
//! 4.  **Data assembler** ([`assembler`]): turns the raw batches of one poll into a typed
//!     snapshot, device metadata and the second circuit flag.
//!
//! ## Quick Start
//!
//! ```no_run
//! use volta_lib::{
//!     protocol::Quantity,
//!     register_map::{Circuit, CircuitField, Field},
//!     tokio_sync_safe_client::SafeClient,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SafeClient::tcp("192.168.1.50:502".parse()?, 1);
//!
//!     let decoded = client.poll()?;
//!     if let Some(metadata) = &decoded.metadata {
//!         println!("{metadata}");
//!     }
//!     let room = Field::Circuit(Circuit::One, CircuitField::TemperatureCurrent);
//!     println!("Room: {:?}", decoded.snapshot.get(room));
//!
//!     let manual = Field::Circuit(Circuit::One, CircuitField::TemperatureManual);
//!     client.apply(manual, &Quantity::Float(21.5))?;
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod protocol;
pub mod register_map;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
pub mod config;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync_safe_client;
