// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Number of addressable entries in a MODBUS table.
pub const MODBUS_ADDRESS_SPACE: usize = 65536;

/// Upper bound for `read_chunk_size`.
const MAX_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Per-connection session policy. None of these values affect protocol correctness.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// A session that has not produced a complete frame for this long is closed.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// How long a single socket read may block before the session re-checks
    /// the shutdown flag and the idle clock.
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
    /// The maximum number of bytes requested from the socket per read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_idle_timeout_seconds() -> u64 {
    60
}
fn default_read_timeout_seconds() -> u64 {
    5
}
fn default_read_chunk_size() -> usize {
    128
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
            read_timeout_seconds: default_read_timeout_seconds(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

/// Sizes of the four MODBUS tables served by the built-in register bank.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisterConfig {
    #[serde(default = "default_table_size")]
    pub coils: usize,
    #[serde(default = "default_table_size")]
    pub discrete_inputs: usize,
    #[serde(default = "default_table_size")]
    pub holding_registers: usize,
    #[serde(default = "default_table_size")]
    pub input_registers: usize,
}

fn default_table_size() -> usize {
    MODBUS_ADDRESS_SPACE
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            coils: default_table_size(),
            discrete_inputs: default_table_size(),
            holding_registers: default_table_size(),
            input_registers: default_table_size(),
        }
    }
}

/// Configuration for TLS encryption (MODBUS/TCP Security).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "modbus.crt".to_string()
}
fn default_key_path() -> String {
    "modbus.key".to_string()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9502
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_shutdown_grace_seconds")]
    shutdown_grace_seconds: u64,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    registers: RegisterConfig,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    502
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    1024
}
fn default_shutdown_grace_seconds() -> u64 {
    10
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    /// How long the server waits for sessions to wind down on shutdown.
    pub shutdown_grace_seconds: u64,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub registers: RegisterConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            session: SessionConfig::default(),
            registers: RegisterConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Loads `path` if it exists, otherwise falls back to the built-in defaults.
    pub fn from_file_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            warn!("Config file '{}' not found, using defaults.", path);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            shutdown_grace_seconds: raw_config.shutdown_grace_seconds,
            session: raw_config.session,
            registers: raw_config.registers,
            tls: raw_config.tls,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }

        let session = &self.session;
        if session.idle_timeout_seconds == 0 {
            return Err(anyhow!("session.idle_timeout_seconds cannot be 0"));
        }
        if session.read_timeout_seconds == 0 {
            return Err(anyhow!("session.read_timeout_seconds cannot be 0"));
        }
        if session.read_chunk_size == 0 || session.read_chunk_size > MAX_READ_CHUNK_SIZE {
            return Err(anyhow!(
                "session.read_chunk_size must be between 1 and {MAX_READ_CHUNK_SIZE}"
            ));
        }
        if session.read_timeout_seconds > session.idle_timeout_seconds {
            warn!(
                "session.read_timeout_seconds ({}) exceeds session.idle_timeout_seconds ({}); idle sessions will only be detected every {} seconds.",
                session.read_timeout_seconds,
                session.idle_timeout_seconds,
                session.read_timeout_seconds
            );
        }

        for (name, size) in [
            ("coils", self.registers.coils),
            ("discrete_inputs", self.registers.discrete_inputs),
            ("holding_registers", self.registers.holding_registers),
            ("input_registers", self.registers.input_registers),
        ] {
            if size > MODBUS_ADDRESS_SPACE {
                return Err(anyhow!(
                    "registers.{name} cannot exceed {MODBUS_ADDRESS_SPACE} entries"
                ));
            }
        }

        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            return Err(anyhow!(
                "tls.cert_path and tls.key_path are required when TLS is enabled"
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }

        Ok(())
    }
}
