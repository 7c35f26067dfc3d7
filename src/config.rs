//! YAML connection configuration.
//!
//! ```yaml
//! host: 192.168.1.50
//! port: 502
//! device_id: 1
//! timeout: 5s
//! poll_interval: 30s
//! ```
//!
//! Everything except `host` is optional.

use crate::protocol as proto;
use serde::Deserialize;
use std::{
    fs::File,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Cannot resolve '{host}:{port}'")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Where and how to reach one controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_device_id")]
    pub device_id: u8,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Polling cadence for long running callers.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_port() -> u16 {
    proto::DEFAULT_PORT
}

fn default_device_id() -> u8 {
    proto::DEFAULT_DEVICE_ID
}

fn default_timeout() -> Duration {
    proto::DEFAULT_TIMEOUT
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

impl ConnectionConfig {
    /// A configuration with defaults for everything but the host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            device_id: default_device_id(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("Loading config file from {path:?}");
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_reader(file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Resolves `host:port` to the first socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let resolve_error = |source: Option<std::io::Error>| ConfigError::Resolve {
            host: self.host.clone(),
            port: self.port,
            source,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| resolve_error(Some(err)))?
            .next()
            .ok_or_else(|| resolve_error(None))
    }

    /// Builds the connector for this controller.
    #[cfg(feature = "tokio-tcp-sync")]
    pub fn connector(&self) -> Result<crate::tokio_common::TcpConnector, ConfigError> {
        let connector = crate::tokio_common::TcpConnector::new(self.socket_addr()?, self.device_id);
        Ok(connector.with_timeout(self.timeout))
    }
}
