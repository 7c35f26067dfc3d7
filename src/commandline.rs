use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::{path::PathBuf, time::Duration};
use volta_lib::{protocol as proto, register_map::Field};

fn parse_device_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid device id format: {e}"))
}

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register format: {e}"))
}

fn parse_field(s: &str) -> Result<Field, String> {
    s.parse::<Field>()
        .map_err(|e: proto::Error| format!("{e}, run the 'fields' command for a list"))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Connect to a controller via Modbus TCP.
    Tcp {
        /// The IP address or hostname of the controller, optionally with a port.
        /// Example: "192.168.1.50" or "volta.local:502".
        #[clap(verbatim_doc_comment)]
        address: String,

        /// The Modbus unit identifier of the controller.
        /// Can be specified in decimal or hexadecimal (e.g., "0x01").
        #[arg(long, default_value_t = proto::DEFAULT_DEVICE_ID, value_parser = parse_device_id, verbatim_doc_comment)]
        device_id: u8,

        /// Commands for the connected controller.
        #[command(subcommand)]
        command: CliCommands,
    },
    /// Connect to the controller described by a YAML configuration file.
    /// Keys: host, port, device_id, timeout, poll_interval.
    #[clap(verbatim_doc_comment)]
    Config {
        /// Path of the configuration file.
        file: PathBuf,

        /// Commands for the connected controller.
        #[command(subcommand)]
        command: CliCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: poll the controller at a fixed interval and print every snapshot.
    /// A failed poll is logged and retried at the next interval.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between polls (e.g., "30s", "1m").
        /// Defaults to the configuration file value or 30 seconds.
        #[arg(value_parser = humantime::parse_duration, short, long, verbatim_doc_comment)]
        poll_interval: Option<Duration>,
    },

    /// Poll all register batches and display the decoded values.
    Read,

    /// Poll all register batches and display the raw registers per batch.
    Raw,

    /// Display serial number, versions, MAC address and whether the second heating
    /// circuit is installed.
    Info,

    /// Read and display a single field.
    Get {
        /// Field name, e.g. "ch1_temperature_current".
        #[arg(value_parser = parse_field)]
        field: Field,
    },

    /// Write a single field.
    /// The value is checked against the declared limits of the field before writing.
    /// Flags accept on/off, true/false or 1/0.
    #[clap(verbatim_doc_comment)]
    Set {
        /// Field name, e.g. "dhw_temperature_manual".
        #[arg(value_parser = parse_field)]
        field: Field,
        /// New value in the unit of the field, e.g. "52.5".
        #[arg(allow_hyphen_values = true)]
        value: String,
    },

    /// Write a raw value to a holding register.
    /// Addresses and values can be specified in decimal or hexadecimal.
    /// **Warning:** No validation is performed.
    #[clap(verbatim_doc_comment)]
    Write {
        #[arg(value_parser = parse_register)]
        address: u16,
        #[arg(value_parser = parse_register)]
        value: u16,
    },

    /// List all known fields with their registers, access and limits.
    Fields,

    /// Acknowledge attention flags and clear the error code.
    ResetError,

    /// Restart the controller.
    Restart {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One line per value.
    #[default]
    Text,
    /// YAML document.
    Yaml,
}

const fn about_text() -> &'static str {
    "Jablotron Volta CLI - Read and configure Jablotron Volta heating controllers via Modbus TCP."
}

#[derive(Parser, Debug)]
#[command(name="voltactl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the connection and the command to run.
    #[command(subcommand)]
    pub connection: CliConnection,

    /// Modbus I/O timeout for connect, read and write operations.
    /// Defaults to the configuration file value or 5 seconds.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Output format of read commands.
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use volta_lib::register_map::{Circuit, CircuitField};

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_set_with_negative_value() {
        let args = CliArgs::parse_from([
            "voltactl",
            "tcp",
            "10.0.0.7",
            "--device-id",
            "0x02",
            "set",
            "ch2_equitherm_offset",
            "-2.5",
        ]);
        assert_eq!(
            args.connection,
            CliConnection::Tcp {
                address: "10.0.0.7".into(),
                device_id: 2,
                command: CliCommands::Set {
                    field: Field::Circuit(Circuit::Two, CircuitField::EquithermOffset),
                    value: "-2.5".into(),
                },
            }
        );
    }

    #[test]
    fn global_options_after_command() {
        let args = CliArgs::parse_from([
            "voltactl", "config", "volta.yml", "read", "--format", "yaml", "--timeout", "2s",
        ]);
        assert_eq!(args.format, OutputFormat::Yaml);
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(CliArgs::try_parse_from(["voltactl", "tcp", "h", "get", "ch3_mode"]).is_err());
    }
}
