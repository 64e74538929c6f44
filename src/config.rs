use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::error::{Result, ServerError};

/// Configuration for the HTTP server.
///
/// Routes are not part of this struct: handlers are code, so they are
/// passed to [`Server::init`](crate::Server::init) as a [`Routes`](crate::Routes)
/// table. Everything else can come from environment variables with the
/// "PTTH_" prefix or from a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on. Defaults to "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on. Defaults to 8080.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory static files are served from. Defaults to the current directory.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Pending connection backlog passed to listen(2). Defaults to 10.
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Readiness events fetched per wait. Defaults to backlog + 1.
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Size of the single receive buffer; longer requests are cut here. Defaults to 2048.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

/// Implements conversion from the config crate's Config type to ServerConfig.
impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> std::result::Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig instance from environment variables and config file.
    ///
    /// This method will:
    /// 1. Load environment variables from a .env file if present
    /// 2. Load configuration from a "ptth" file (if it exists)
    /// 3. Override with environment variables prefixed with "PTTH_"
    ///
    /// # Errors
    /// Returns a ConfigError if configuration loading or parsing fails.
    pub fn new() -> std::result::Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("ptth").required(false))
            .add_source(config::Environment::with_prefix("PTTH"));

        builder.build()?.try_into()
    }

    /// Config listening on `port` with every other field defaulted.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Resolves `host:port` into the address the listener binds.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let spec = format!("{}:{}", self.host, self.port);
        spec.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ServerError::Address(spec))
    }

    /// The directory static files are resolved against.
    pub fn static_root(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Default host address.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default port number.
fn default_port() -> u16 {
    8080
}

/// Default listen backlog.
fn default_backlog() -> i32 {
    10
}

/// Default events per wait, one more than the backlog.
fn default_events_capacity() -> usize {
    default_backlog() as usize + 1
}

/// Default receive buffer size (2kb).
fn default_recv_buffer_size() -> usize {
    2048
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_dir: None,
            backlog: default_backlog(),
            events_capacity: default_events_capacity(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}
