use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that prevent a server from being initialized.
///
/// Once a [`Server`](crate::Server) exists, per-connection failures are logged
/// and never surface through this type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host and port do not form a socket address
    #[error("invalid listen address {0:?}")]
    Address(String),

    /// Error creating the listening socket
    #[error("socket creation failed: {0}")]
    Socket(io::Error),

    /// Error binding the listening socket to its address
    #[error("bind failed: {0}")]
    Bind(io::Error),

    /// Error putting the bound socket into listening state
    #[error("listen failed: {0}")]
    Listen(io::Error),

    /// Error creating the readiness multiplexer
    #[error("multiplexer initialization failed: {0}")]
    Multiplexer(io::Error),

    /// Error registering the listener or the waker with the multiplexer
    #[error("registration failed: {0}")]
    Registration(io::Error),

    /// More routes were supplied than the table holds
    #[error("route table is full ({capacity} routes)")]
    RouteTableFull { capacity: usize },

    /// Error loading the configuration
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Reasons a static lookup fails. Every variant is answered with a 404.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The path held no segments to open
    #[error("empty resource path")]
    EmptyPath,

    /// A `..` segment was refused
    #[error("parent segment refused in {0:?}")]
    Traversal(String),

    /// The path ended on a directory
    #[error("{0:?} is a directory")]
    Directory(PathBuf),

    /// The path named something other than a regular file or directory
    #[error("{0:?} is not a regular file")]
    NotRegular(PathBuf),

    /// A segment could not be opened relative to its directory
    #[error("cannot open {segment:?}: {source}")]
    Open {
        segment: String,
        #[source]
        source: io::Error,
    },

    /// The file was found but could not be read
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
}

/// Type alias for Results using ServerError as the error type
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that socket-level failures keep the underlying io error text
    #[test]
    fn test_bind_error_display() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        let err = ServerError::Bind(io_err);

        assert!(matches!(err, ServerError::Bind(_)));
        assert_eq!(err.to_string(), "bind failed: address in use");
    }

    /// Tests the conversion from config errors
    #[test]
    fn test_config_error_conversion() {
        let err = ServerError::from(config::ConfigError::Message("bad port".into()));
        assert!(matches!(err, ServerError::Config(_)));
    }

    /// Tests that open failures expose their io error as the source
    #[test]
    fn test_resolve_error_source() {
        use std::error::Error as _;

        let err = ResolveError::Open {
            segment: "missing.html".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("cannot open \"missing.html\""));
    }
}
