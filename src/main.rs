//! Jablotron Volta CLI
//!
//! A command-line interface (CLI) application for interacting with Jablotron Volta
//! heating controllers using Modbus TCP.
//!
//! This tool allows users to:
//! - Poll all register batches and display the decoded values or the raw registers.
//! - Display device metadata and whether the second heating circuit is installed.
//! - Read and write single fields by name, with the declared limits enforced.
//! - Write raw holding registers.
//! - Reset the error state and restart the controller.
//! - Run in a continuous daemon mode printing every poll to the console.
//!
//! The CLI leverages the `volta_lib` crate for the register map and client operations.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    panic,
    time::Duration,
};
use volta_lib::{
    assembler::Decoded,
    config::ConnectionConfig,
    protocol::{self as proto, Quantity},
    register_map::{self, Command, Field, Unit},
    tokio_common::TcpConnector,
    tokio_sync_safe_client::SafeClient,
};

mod commandline;

use commandline::{CliArgs, CliCommands, CliConnection, OutputFormat};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Formats a value with the unit of its field.
fn with_unit(field: Field, value: &Quantity) -> String {
    match field.descriptor().map(|descriptor| descriptor.unit) {
        Ok(Unit::Unitless) | Err(_) => value.to_string(),
        Ok(unit) => format!("{value} {unit}"),
    }
}

fn print_decoded(decoded: &Decoded, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => {
            print!(
                "{}",
                serde_yaml::to_string(decoded).context("Cannot serialize snapshot")?
            );
        }
        OutputFormat::Text => {
            if let Some(metadata) = &decoded.metadata {
                println!("{metadata}");
            }
            print_second_circuit(decoded.has_second_circuit);
            for (field, value) in decoded.snapshot.iter() {
                println!("{field}: {}", with_unit(field, value));
            }
        }
    }
    Ok(())
}

fn print_second_circuit(installed: bool) {
    let state = if installed {
        "installed"
    } else {
        "not installed"
    };
    println!("Second heating circuit: {state}");
}

fn print_fields() {
    println!(
        "{:<34} {:<8} {:>7} {:<3} {:<5} limits",
        "field", "type", "address", "rw", "unit"
    );
    for descriptor in register_map::all_descriptors() {
        let limits = descriptor
            .limits
            .map(|l| format!("{}..={} step {}", l.min, l.max, l.step))
            .unwrap_or_default();
        println!(
            "{:<34} {:<8} {:>7} {:<3} {:<5} {}",
            descriptor.field.to_string(),
            descriptor.register_type().to_string(),
            descriptor.address(),
            descriptor.access.to_string(),
            descriptor.unit.to_string(),
            limits
        );
    }
}

/// Resolves "host" or "host:port".
fn resolve_address(address: &str) -> Result<SocketAddr> {
    let resolved = match address.to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(_) => (address, proto::DEFAULT_PORT)
            .to_socket_addrs()
            .with_context(|| format!("Invalid TCP address: '{address}'"))?
            .next(),
    };
    resolved.with_context(|| format!("No address found for '{address}'"))
}

/// Creates a new client based on the provided command-line arguments.
fn create_client(
    connection: &CliConnection,
    timeout: Option<Duration>,
) -> Result<(SafeClient, Duration, &CliCommands)> {
    match connection {
        CliConnection::Tcp {
            address,
            device_id,
            command,
        } => {
            let socket_addr = resolve_address(address)?;
            info!("Using Modbus TCP controller at {socket_addr}, device {device_id}");
            let connector = TcpConnector::new(socket_addr, *device_id)
                .with_timeout(timeout.unwrap_or(proto::DEFAULT_TIMEOUT));
            Ok((SafeClient::new(connector), DEFAULT_POLL_INTERVAL, command))
        }
        CliConnection::Config { file, command } => {
            let mut config = ConnectionConfig::from_file(file)?;
            if let Some(timeout) = timeout {
                config.timeout = timeout;
            }
            info!("Using configuration {config:?}");
            let connector = config.connector()?;
            Ok((SafeClient::new(connector), config.poll_interval, command))
        }
    }
}

fn handle_set(client: &mut SafeClient, field: Field, text: &str) -> Result<()> {
    let descriptor = field.descriptor()?;
    if !descriptor.is_writable() {
        bail!("Field '{field}' is read-only");
    }
    let value = descriptor.parse_quantity(text)?;
    descriptor.check_limits(&value)?;
    client
        .apply(field, &value)
        .with_context(|| format!("Cannot write field '{field}'"))?;
    println!("{field} set to {}", with_unit(field, &value));
    Ok(())
}

fn handle_write(client: &mut SafeClient, address: u16, value: u16) -> Result<()> {
    client.connect()?;
    let result = client.write_register(address, value);
    client.close();
    result.with_context(|| format!("Cannot write {value} to register {address}"))?;
    println!("Register {address} set to {value}");
    Ok(())
}

fn handle_raw(client: &mut SafeClient, format: OutputFormat) -> Result<()> {
    client.connect()?;
    let result = client.read_all_data();
    client.close();
    let named = result.context("Cannot read registers")?.to_named();
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&named)?),
        OutputFormat::Text => {
            for (name, registers) in &named.batches {
                println!("{name}: {registers:?}");
            }
            if let Some(available) = named.ch2_available {
                println!("ch2_available: {available}");
            }
        }
    }
    Ok(())
}

/// Handles the restart command.
///
/// The controller may reboot before answering, so a timeout after the write is
/// treated as success.
fn handle_restart(client: &mut SafeClient, confirmed: bool) -> Result<()> {
    if !confirmed
        && !Confirm::new()
            .with_prompt("Are you sure you want to restart the controller?")
            .default(false)
            .show_default(true)
            .interact()?
    {
        info!("Restart aborted by user.");
        return Ok(());
    }
    if let Err(error) = client.execute(Command::RestartDevice) {
        let timed_out = matches!(
            &error,
            volta_lib::tokio_common::Error::TokioError(tokio_modbus::Error::Transport(err))
                if err.kind() == std::io::ErrorKind::TimedOut
        );
        if !timed_out {
            return Err(error).context("Cannot restart controller");
        }
        debug!("Restart returned a timeout, the controller is rebooting");
    }
    println!("Restart command sent.");
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Volta CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let (mut client, poll_interval, command) = create_client(&args.connection, args.timeout)?;

    match command {
        CliCommands::Daemon {
            poll_interval: interval,
        } => {
            let interval = interval.unwrap_or(poll_interval);
            info!("Starting daemon mode: interval={interval:?}");
            loop {
                match client.poll() {
                    Ok(decoded) => print_decoded(&decoded, args.format)?,
                    Err(err) => error!("Poll failed: {err}"),
                }
                std::thread::sleep(interval);
            }
        }
        CliCommands::Read => {
            let decoded = client.poll().context("Cannot poll controller")?;
            print_decoded(&decoded, args.format)?;
        }
        CliCommands::Raw => handle_raw(&mut client, args.format)?,
        CliCommands::Info => {
            let decoded = client.poll().context("Cannot poll controller")?;
            match (&decoded.metadata, args.format) {
                (Some(metadata), OutputFormat::Yaml) => {
                    print!("{}", serde_yaml::to_string(metadata)?)
                }
                (Some(metadata), OutputFormat::Text) => println!("{metadata}"),
                (None, _) => warn!("Device info block unavailable"),
            }
            print_second_circuit(decoded.has_second_circuit);
        }
        CliCommands::Get { field } => {
            let value = client
                .get(*field)
                .with_context(|| format!("Cannot read field '{field}'"))?;
            println!("{field}: {}", with_unit(*field, &value));
        }
        CliCommands::Set { field, value } => handle_set(&mut client, *field, value)?,
        CliCommands::Write { address, value } => handle_write(&mut client, *address, *value)?,
        CliCommands::Fields => print_fields(),
        CliCommands::ResetError => {
            client
                .execute(Command::ResetError)
                .context("Cannot reset error")?;
            println!("Error state reset.");
        }
        CliCommands::Restart { yes } => handle_restart(&mut client, *yes)?,
    }
    Ok(())
}
