//! Configuration for the ferry binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::buffer::Allocation;
use crate::session::DEFAULT_PORT;
use crate::transfer::{TransferEngine, TransferMode, DEFAULT_BUFFER_SIZE};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author = "ferry authors")]
#[command(version = "0.1.0")]
#[command(about = "Blocking file transfer over TCP with explicit buffer windows", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Receive one file from one client, acknowledge it, and exit
    Serve {
        /// Address to bind to (e.g., 0.0.0.0:9898)
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Where to store the received bytes
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Send a file to a server and wait for its acknowledgement
    Send {
        /// Server address (e.g., 127.0.0.1:9898)
        #[arg(short = 'a', long)]
        connect: Option<String>,

        /// File to send
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Copy a local file through the transfer engine
    Copy {
        source: PathBuf,
        dest: PathBuf,

        /// How bytes are moved
        #[arg(short, long, value_enum)]
        mode: Option<TransferMode>,

        #[command(flatten)]
        transfer: TransferArgs,
    },
}

/// Options shared by every subcommand that moves bytes
#[derive(Args, Debug, Default)]
pub struct TransferArgs {
    /// Working buffer size in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Allocate working buffers outside the heap
    #[arg(long)]
    pub direct: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Where received files are written
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            output: default_output(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Server to connect to
    #[serde(default = "default_connect")]
    pub connect: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: default_connect(),
        }
    }
}

/// Transfer engine configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    /// Working buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Use direct (off-heap) buffers
    #[serde(default)]
    pub direct: bool,
    /// Mode for local copies
    #[serde(default)]
    pub mode: TransferMode,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            direct: false,
            mode: TransferMode::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_connect() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_output() -> PathBuf {
    PathBuf::from("received.bin")
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Serve { listen: SocketAddr, output: PathBuf },
    Send { connect: String, file: PathBuf },
    Copy {
        source: PathBuf,
        dest: PathBuf,
        mode: TransferMode,
    },
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub action: Action,
    pub buffer_size: usize,
    pub allocation: Allocation,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments against the optional TOML file.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let (action, transfer) = match cli.command {
            Command::Serve {
                listen,
                output,
                transfer,
            } => {
                let listen = listen.unwrap_or(toml_config.server.listen);
                let listen: SocketAddr = listen
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress(listen.clone()))?;
                let output = output.unwrap_or(toml_config.server.output);
                (Action::Serve { listen, output }, transfer)
            }
            Command::Send {
                connect,
                file,
                transfer,
            } => {
                let connect = connect.unwrap_or(toml_config.client.connect);
                (Action::Send { connect, file }, transfer)
            }
            Command::Copy {
                source,
                dest,
                mode,
                transfer,
            } => {
                let mode = mode.unwrap_or(toml_config.transfer.mode);
                (Action::Copy { source, dest, mode }, transfer)
            }
        };

        let buffer_size = transfer
            .buffer_size
            .unwrap_or(toml_config.transfer.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }
        let allocation = if transfer.direct || toml_config.transfer.direct {
            Allocation::Direct
        } else {
            Allocation::Heap
        };

        Ok(Config {
            action,
            buffer_size,
            allocation,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Transfer engine described by this configuration.
    pub fn engine(&self) -> crate::error::Result<TransferEngine> {
        Ok(TransferEngine::new(self.buffer_size)?.with_allocation(self.allocation))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid socket address '{0}'")]
    InvalidAddress(String),
    #[error("Invalid buffer size {0}: must be at least 1 byte")]
    InvalidBufferSize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::from_cli(CliArgs::try_parse_from(args).unwrap()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:9898");
        assert_eq!(config.client.connect, "127.0.0.1:9898");
        assert_eq!(config.transfer.buffer_size, 1024);
        assert!(!config.transfer.direct);
        assert_eq!(config.transfer.mode, TransferMode::Buffered);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:7000"
            output = "/tmp/out.bin"

            [client]
            connect = "example.com:7000"

            [transfer]
            buffer_size = 8192
            direct = true
            mode = "mapped"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:7000");
        assert_eq!(config.server.output, PathBuf::from("/tmp/out.bin"));
        assert_eq!(config.client.connect, "example.com:7000");
        assert_eq!(config.transfer.buffer_size, 8192);
        assert!(config.transfer.direct);
        assert_eq!(config.transfer.mode, TransferMode::Mapped);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_serve_defaults() {
        let config = parse(&["ferry", "serve"]);
        assert_eq!(
            config.action,
            Action::Serve {
                listen: "0.0.0.0:9898".parse().unwrap(),
                output: PathBuf::from("received.bin"),
            }
        );
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.allocation, Allocation::Heap);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let config = parse(&[
            "ferry",
            "--log-level",
            "trace",
            "send",
            "--connect",
            "10.0.0.1:9000",
            "--file",
            "1.jpg",
            "--buffer-size",
            "4096",
            "--direct",
        ]);
        assert_eq!(
            config.action,
            Action::Send {
                connect: "10.0.0.1:9000".to_string(),
                file: PathBuf::from("1.jpg"),
            }
        );
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.allocation, Allocation::Direct);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.engine().unwrap().buffer_size(), 4096);
    }

    #[test]
    fn test_cli_takes_precedence_over_toml() {
        let cli = CliArgs::try_parse_from(["ferry", "copy", "a", "b", "--mode", "scatter"]).unwrap();
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [transfer]
            buffer_size = 64
            mode = "direct"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(
            config.action,
            Action::Copy {
                source: PathBuf::from("a"),
                dest: PathBuf::from("b"),
                mode: TransferMode::Scatter,
            }
        );
        assert_eq!(config.buffer_size, 64);
    }

    #[test]
    fn test_invalid_values() {
        let cli = CliArgs::try_parse_from(["ferry", "serve", "--listen", "not-an-address"]).unwrap();
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::InvalidAddress(_))
        ));

        let cli = CliArgs::try_parse_from(["ferry", "copy", "a", "b", "-b", "0"]).unwrap();
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::InvalidBufferSize(0))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::try_parse_from([
            "ferry",
            "--config",
            "/nonexistent/ferry.toml",
            "serve",
        ])
        .unwrap();
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
