//! Stateful, shareable client for the Jablotron Volta controller.
//!
//! This module provides the high-level API (`SafeClient` struct). It owns one
//! Modbus-TCP session at a time, authenticates lazily before touching the protected
//! holding registers and runs the batched read plan of [`crate::register_map`].
//!
//! ## Example
//!
//! ```no_run
//! use volta_lib::tokio_sync_safe_client::SafeClient;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.1.50:502".parse()?;
//!     let mut client = SafeClient::tcp(socket_addr, 1);
//!
//!     // Connects, reads every batch and closes again.
//!     let decoded = client.poll()?;
//!     for (field, value) in decoded.snapshot.iter() {
//!         println!("{field}: {value}");
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::{
    assembler::{self, Decoded, RawBatches},
    protocol::{self as proto, Quantity},
    register_map::{BatchGroup, Command, Field, Presence, RegisterType, READ_PLAN},
    tokio_common::{Connector, Error, Result, TcpConnector},
    tokio_sync::Volta,
};
use log::*;
use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

enum State<T> {
    Disconnected,
    Connected { transport: T, authenticated: bool },
}

/// One controller session: the connector plus the current connection, if any.
///
/// The authentication flag belongs to the connection and is discarded with it.
pub struct Session<C: Connector> {
    connector: C,
    state: State<C::Transport>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: State::Disconnected,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Opens the connection. Does nothing if already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let transport = self.connector.connect()?;
        info!("Connected to {}", self.connector.endpoint());
        self.state = State::Connected {
            transport,
            authenticated: false,
        };
        Ok(())
    }

    /// Drops the connection and its authentication. Does nothing if not connected.
    pub fn close(&mut self) {
        if let State::Connected { .. } = std::mem::replace(&mut self.state, State::Disconnected) {
            info!("Closed connection to {}", self.connector.endpoint());
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            State::Connected {
                authenticated: true,
                ..
            }
        )
    }

    fn transport(&mut self) -> Result<&mut C::Transport> {
        match &mut self.state {
            State::Connected { transport, .. } => Ok(transport),
            State::Disconnected => Err(Error::NotConnected),
        }
    }

    /// Runs the handshake unless this connection is already authenticated.
    ///
    /// A failed handshake leaves the connection unauthenticated.
    pub fn ensure_authenticated(&mut self) -> Result<()> {
        let State::Connected {
            transport,
            authenticated,
        } = &mut self.state
        else {
            return Err(Error::NotConnected);
        };
        if *authenticated {
            return Ok(());
        }
        match Volta::authenticate(transport) {
            Ok(()) => {
                info!("Authenticated at {}", self.connector.endpoint());
                *authenticated = true;
                Ok(())
            }
            Err(err) => {
                error!(
                    "Authentication at {} failed: {err}",
                    self.connector.endpoint()
                );
                Err(err)
            }
        }
    }

    /// Reads one register block, authenticating first if it touches the protected window.
    pub fn read_block(
        &mut self,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        if register_type == RegisterType::Holding && proto::is_protected(address, quantity) {
            self.ensure_authenticated()?;
        }
        Volta::read_block(self.transport()?, register_type, address, quantity)
    }

    /// Writes one holding register, authenticating first if it is protected.
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        if proto::is_protected(address, 1) {
            self.ensure_authenticated()?;
        }
        Volta::write_register(self.transport()?, address, value).inspect_err(|err| {
            error!("Writing {value} to register {address} failed: {err}");
        })
    }

    /// Reads a single field.
    pub fn read_field(&mut self, field: Field) -> Result<Quantity> {
        let descriptor = field.descriptor()?;
        if descriptor.requires_authentication() {
            self.ensure_authenticated()?;
        }
        Volta::read_field(self.transport()?, field)
    }

    /// Encodes a value through the field descriptor and writes it.
    ///
    /// Declared limits are the caller's business, see
    /// [`crate::register_map::FieldDescriptor::check_limits`].
    pub fn write_field(&mut self, field: Field, value: &Quantity) -> Result<()> {
        let descriptor = field.descriptor()?;
        let raw = descriptor.encode(value)?;
        info!("Setting {field} to {value}");
        self.write_register(descriptor.address(), raw)
    }

    /// Runs a command. Succeeds if at least one of its writes succeeds.
    pub fn execute(&mut self, command: Command) -> Result<()> {
        info!("Executing {command}");
        let mut last_error = None;
        let mut succeeded = false;
        for (address, value) in command.writes() {
            match self.write_register(*address, *value) {
                Ok(()) => succeeded = true,
                Err(err) => last_error = Some(err),
            }
        }
        match last_error {
            Some(err) if !succeeded => Err(err),
            _ => Ok(()),
        }
    }

    /// Executes the full read plan on the open connection.
    ///
    /// Every batch is independently fallible: a failing batch is logged and left out.
    /// The second circuit settings are only read when its status block shows hardware.
    pub fn read_all_data(&mut self) -> Result<RawBatches> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut raw = RawBatches::new();
        for step in READ_PLAN {
            if step.presence == Presence::SecondCircuitOnly && raw.second_circuit != Some(true) {
                debug!(
                    "Second circuit not present, skipping register {}",
                    step.address()
                );
                continue;
            }
            let result = Volta::read_step(step, |register_type, address, quantity| {
                self.read_block(register_type, address, quantity)
            });
            let block = match result {
                Ok(block) => block,
                Err(err) => {
                    warn!(
                        "Batch at {} register {} unavailable: {err}",
                        step.register_type,
                        step.address()
                    );
                    continue;
                }
            };
            if step.presence == Presence::SecondCircuitCheck {
                let present = !Volta::is_absent(&block);
                raw.second_circuit = Some(present);
                if !present {
                    debug!("Second circuit not installed");
                    continue;
                }
            }
            for (group, registers) in step.slice(&block) {
                raw.insert(group, registers.to_vec());
            }
        }
        debug!(
            "Read {} of {} batch groups",
            raw.len(),
            BatchGroup::ALL.len()
        );
        Ok(raw)
    }

    /// One complete poll: connect, authenticate, read every batch, close.
    ///
    /// A connection opened by the poll is closed on every exit path; one that was
    /// already open stays open. Failing to connect or to authenticate fails the poll;
    /// a poll that read no batch at all fails with [`Error::NoData`].
    pub fn poll(&mut self) -> Result<Decoded> {
        self.scoped(Self::poll_connected)
    }

    fn poll_connected(&mut self) -> Result<Decoded> {
        self.ensure_authenticated()?;
        let raw = self.read_all_data()?;
        if raw.is_empty() {
            return Err(Error::NoData);
        }
        Ok(assembler::assemble(&raw))
    }

    /// Runs `operation` on a connection; opens one for the call if none is open and
    /// closes it again afterwards.
    pub fn scoped<R>(&mut self, operation: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let opened = !self.is_connected();
        if opened {
            self.connect()?;
        }
        let result = operation(self);
        if opened {
            self.close();
        }
        result
    }
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.connector.endpoint())
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Thread-safe handle to a [`Session`].
///
/// Clones share the session; every call holds the lock for its whole duration so a
/// poll or a write command never interleaves with another transaction.
pub struct SafeClient<C: Connector = TcpConnector> {
    session: Arc<Mutex<Session<C>>>,
}

impl SafeClient<TcpConnector> {
    /// Creates a client for a Modbus-TCP controller with the default timeout.
    pub fn tcp(socket_addr: SocketAddr, device_id: u8) -> Self {
        Self::new(TcpConnector::new(socket_addr, device_id))
    }
}

impl<C: Connector> SafeClient<C> {
    /// Creates a new, disconnected `SafeClient`.
    pub fn new(connector: C) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new(connector))),
        }
    }

    /// Creates a new `SafeClient` from a shared session.
    pub fn from_shared(session: Arc<Mutex<Session<C>>>) -> Self {
        Self { session }
    }

    /// Clones the shared session.
    pub fn clone_shared(&self) -> Arc<Mutex<Session<C>>> {
        self.session.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Session<C>> {
        // A panic inside a transaction leaves the session usable; the state is
        // consistent after every single assignment.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the connection, see [`Session::connect`].
    pub fn connect(&mut self) -> Result<()> {
        self.lock().connect()
    }

    /// Closes the connection, see [`Session::close`].
    pub fn close(&mut self) {
        self.lock().close()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated()
    }

    /// Runs the handshake on the open connection unless already done.
    pub fn authenticate(&mut self) -> Result<()> {
        self.lock().ensure_authenticated()
    }

    /// Reads one register block on the open connection.
    pub fn read_block(
        &mut self,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>> {
        self.lock().read_block(register_type, address, quantity)
    }

    /// Writes one holding register on the open connection.
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.lock().write_register(address, value)
    }

    /// Reads a single field on the open connection.
    pub fn read_field(&mut self, field: Field) -> Result<Quantity> {
        self.lock().read_field(field)
    }

    /// Writes a single field on the open connection.
    pub fn write_field(&mut self, field: Field, value: &Quantity) -> Result<()> {
        self.lock().write_field(field, value)
    }

    /// Executes the read plan on the open connection.
    pub fn read_all_data(&mut self) -> Result<RawBatches> {
        self.lock().read_all_data()
    }

    /// Polls the controller, see [`Session::poll`].
    pub fn poll(&mut self) -> Result<Decoded> {
        self.lock().poll()
    }

    /// Reads a single field as a scoped operation.
    pub fn get(&mut self, field: Field) -> Result<Quantity> {
        self.lock().scoped(|session| session.read_field(field))
    }

    /// Writes a single field as a scoped operation.
    pub fn apply(&mut self, field: Field, value: &Quantity) -> Result<()> {
        self.lock()
            .scoped(|session| session.write_field(field, value))
    }

    /// Executes a command as a scoped operation.
    pub fn execute(&mut self, command: Command) -> Result<()> {
        self.lock().scoped(|session| session.execute(command))
    }
}

impl<C: Connector> Clone for SafeClient<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for SafeClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.session.try_lock() {
            Ok(session) => f.debug_tuple("SafeClient").field(&*session).finish(),
            Err(_) => f.debug_tuple("SafeClient").field(&"<busy>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        register_map::{Circuit, CircuitField},
        tokio_common::fake::{FakeDevice, Op},
    };
    use assert_matches::assert_matches;

    fn client(device: &FakeDevice) -> SafeClient<FakeDevice> {
        SafeClient::new(device.clone())
    }

    #[test]
    fn protected_write_authenticates_exactly_once() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.connect().unwrap();
        assert!(!client.is_authenticated());

        client.write_register(1104, 480).unwrap();
        assert_eq!(device.handshakes(), 1);
        assert!(client.is_authenticated());

        client.write_register(1106, 25).unwrap();
        client.read_block(RegisterType::Holding, 1200, 20).unwrap();
        assert_eq!(device.handshakes(), 1);
        assert_eq!(device.writes(), vec![(1104, 480), (1106, 25)]);
    }

    #[test]
    fn unprotected_access_needs_no_handshake() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.connect().unwrap();
        client.read_block(RegisterType::Input, 200, 7).unwrap();
        assert_eq!(
            client.read_field(Field::BoilerPressure).unwrap(),
            Quantity::Float(1.5)
        );
        assert_eq!(device.handshakes(), 0);
        assert!(!client.is_authenticated());
    }

    #[test]
    fn failed_handshake_fails_the_write() {
        let device = FakeDevice::volta();
        device.state().reject_password = true;
        let mut client = client(&device);
        client.connect().unwrap();

        assert_matches!(
            client.write_register(1104, 480),
            Err(Error::TokioExceptionError(_))
        );
        assert!(!client.is_authenticated());
        assert!(device.writes().is_empty());
        assert_eq!(device.state().holding[&1104], 500);

        // The next protected access retries the handshake.
        assert!(client.read_block(RegisterType::Holding, 1030, 6).is_err());
        assert_eq!(device.handshakes(), 2);
    }

    #[test]
    fn connect_and_close_are_idempotent() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.close();
        client.connect().unwrap();
        client.connect().unwrap();
        assert_eq!(device.connects(), 1);
        client.authenticate().unwrap();
        client.close();
        client.close();
        assert!(!client.is_connected());
        assert!(!client.is_authenticated());
    }

    #[test]
    fn reconnect_authenticates_again() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.connect().unwrap();
        client.write_register(1104, 480).unwrap();
        client.close();
        client.connect().unwrap();
        client.write_register(1104, 490).unwrap();
        assert_eq!(device.handshakes(), 2);
        assert_eq!(device.state().holding[&1104], 490);
    }

    #[test]
    fn operations_need_a_connection() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        assert_matches!(
            client.read_block(RegisterType::Input, 20, 2),
            Err(Error::NotConnected)
        );
        assert_matches!(client.write_register(1104, 1), Err(Error::NotConnected));
        assert_matches!(client.read_all_data(), Err(Error::NotConnected));
        assert_matches!(client.authenticate(), Err(Error::NotConnected));
        assert_eq!(device.ops(), vec![]);
    }

    #[test]
    fn read_all_data_without_second_circuit() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.connect().unwrap();
        let raw = client.read_all_data().unwrap();

        assert_eq!(raw.second_circuit, Some(false));
        assert!(!raw.contains(BatchGroup::ChStatus(Circuit::Two)));
        assert!(!raw.contains(BatchGroup::ChSettings(Circuit::Two)));
        assert_eq!(raw.len(), BatchGroup::ALL.len() - 2);
        assert!(!device
            .ops()
            .contains(&Op::Read(RegisterType::Holding, 1300, 20)));
        assert_eq!(device.handshakes(), 1);
        assert_eq!(
            raw.get(BatchGroup::DhwSettings),
            Some(&[1, 500, 350, 650, 500, 0, 20, 2][..])
        );
        assert_eq!(raw.get(BatchGroup::NetworkInfo).map(<[u16]>::len), Some(6));
        assert_eq!(
            raw.get(BatchGroup::BoilerSettings).map(<[u16]>::len),
            Some(13)
        );
    }

    #[test]
    fn read_all_data_with_second_circuit() {
        for status in [[1, 215, 0, 0, 0, 0, 0], [0, 0, 0, 0, 0, 0xFFFF, 0]] {
            let device = FakeDevice::volta().with_second_circuit(status);
            let mut client = client(&device);
            client.connect().unwrap();
            let raw = client.read_all_data().unwrap();
            assert_eq!(raw.second_circuit, Some(true));
            assert_eq!(
                raw.get(BatchGroup::ChStatus(Circuit::Two)),
                Some(&status[..])
            );
            assert!(raw.contains(BatchGroup::ChSettings(Circuit::Two)));
            assert_eq!(raw.len(), BatchGroup::ALL.len());
        }
    }

    #[test]
    fn all_ones_status_means_absent() {
        let device = FakeDevice::volta().with_second_circuit([0xFFFF; 7]);
        let mut client = client(&device);
        client.connect().unwrap();
        let raw = client.read_all_data().unwrap();
        assert_eq!(raw.second_circuit, Some(false));
        assert!(!raw.contains(BatchGroup::ChSettings(Circuit::Two)));
    }

    #[test]
    fn failing_batches_are_left_out() {
        let device = FakeDevice::volta();
        device.state().failing_reads = vec![40, 1200];
        let mut client = client(&device);
        client.connect().unwrap();
        let raw = client.read_all_data().unwrap();
        assert!(!raw.contains(BatchGroup::BoilerStatus));
        assert!(!raw.contains(BatchGroup::ChSettings(Circuit::One)));
        assert!(raw.contains(BatchGroup::SystemControl));
        assert!(raw.contains(BatchGroup::DhwStatus));
    }

    #[test]
    fn failed_presence_read_skips_second_circuit() {
        let device = FakeDevice::volta().with_second_circuit([1; 7]);
        device.state().failing_reads = vec![300];
        let mut client = client(&device);
        client.connect().unwrap();
        let raw = client.read_all_data().unwrap();
        assert_eq!(raw.second_circuit, None);
        assert!(!raw.contains(BatchGroup::ChSettings(Circuit::Two)));
    }

    #[test]
    fn poll_decodes_and_closes() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        let decoded = client.poll().unwrap();
        assert!(!client.is_connected());

        let metadata = decoded.metadata.unwrap();
        assert_eq!(metadata.serial_number, "65538");
        assert_eq!(metadata.firmware_version, "3.5.7");
        assert!(!decoded.has_second_circuit);
        let snapshot = decoded.snapshot;
        assert_eq!(
            snapshot.get(Field::IpAddress),
            Some(&Quantity::Text("192.168.1.100".into()))
        );
        assert_eq!(
            snapshot.get(Field::OutdoorTempManual),
            Some(&Quantity::Float(-5.0))
        );
        assert_eq!(
            snapshot.get(Field::DhwRegulationStrategy),
            Some(&Quantity::Integer(2))
        );
        assert_eq!(
            snapshot.get(Field::Circuit(Circuit::One, CircuitField::EquithermOffset)),
            Some(&Quantity::Float(-2.0))
        );
        assert_eq!(
            snapshot.get(Field::CircuitMask),
            Some(&Quantity::Integer(1))
        );
        assert!(!snapshot.contains(Field::Circuit(Circuit::Two, CircuitField::Mode)));

        // Every poll is a fresh session.
        client.poll().unwrap();
        assert_eq!(device.connects(), 2);
        assert_eq!(device.handshakes(), 2);
    }

    #[test]
    fn poll_fails_hard_on_connection_or_handshake() {
        let device = FakeDevice::volta();
        device.state().refuse_connect = true;
        let mut refused = client(&device);
        assert_matches!(refused.poll(), Err(Error::Connect { .. }));
        assert!(!refused.is_connected());

        let device = FakeDevice::volta();
        device.state().reject_password = true;
        let mut client = client(&device);
        assert_matches!(client.poll(), Err(Error::TokioExceptionError(_)));
        assert!(!client.is_connected());
        assert!(!device
            .ops()
            .iter()
            .any(|op| matches!(op, Op::Read(..))));
    }

    #[test]
    fn poll_keeps_a_connection_opened_by_the_caller() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.connect().unwrap();

        client.poll().unwrap();
        assert!(client.is_connected());
        assert!(client.is_authenticated());

        client.poll().unwrap();
        client.write_register(1104, 470).unwrap();
        let session = client.clone_shared();
        let session = session.lock().unwrap();
        assert_eq!(session.connector().connects(), 1);
        assert_eq!(session.connector().handshakes(), 1);
    }

    #[test]
    fn poll_without_any_batch_is_no_data() {
        let device = FakeDevice::default();
        let mut client = client(&device);
        assert_matches!(client.poll(), Err(Error::NoData));
        assert!(!client.is_connected());
    }

    #[test]
    fn scoped_operations_restore_connection_state() {
        let device = FakeDevice::volta();
        let mut client = client(&device);

        let offset = Field::Circuit(Circuit::Two, CircuitField::EquithermOffset);
        client.apply(offset, &Quantity::Float(-1.5)).unwrap();
        assert!(!client.is_connected());
        assert_eq!(device.state().holding[&1312], 65521);

        client.connect().unwrap();
        assert_eq!(client.get(offset).unwrap(), Quantity::Float(-1.5));
        assert!(client.is_connected());
        assert_eq!(device.connects(), 2);
    }

    #[test]
    fn write_field_rejects_read_only_fields() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        assert_matches!(
            client.apply(Field::BoilerWaterSetpoint, &Quantity::Float(50.0)),
            Err(Error::ProtocolError(proto::Error::ReadOnlyField(
                Field::BoilerWaterSetpoint
            )))
        );
        assert!(device.writes().is_empty());
    }

    #[test]
    fn reset_error_succeeds_if_any_write_does() {
        let device = FakeDevice::volta();
        device.state().failing_writes = vec![proto::ATTENTION_REG_ADDR];
        let mut client = client(&device);
        client.execute(Command::ResetError).unwrap();
        assert_eq!(device.writes(), vec![(1001, 0), (3004, 0)]);

        device
            .state()
            .failing_writes
            .push(proto::ERROR_CODE_REG_ADDR);
        assert_matches!(
            client.execute(Command::ResetError),
            Err(Error::TokioExceptionError(_))
        );
    }

    #[test]
    fn restart_device() {
        let device = FakeDevice::volta();
        let mut client = client(&device);
        client.execute(Command::RestartDevice).unwrap();
        assert_eq!(device.writes(), vec![(3003, 1)]);
        assert_eq!(device.handshakes(), 1);
    }

    #[test]
    fn clones_share_the_session() {
        let device = FakeDevice::volta();
        let mut first = client(&device);
        let second = first.clone();
        first.connect().unwrap();
        assert!(second.is_connected());
        let third = SafeClient::from_shared(second.clone_shared());
        assert!(third.is_connected());
    }
}
