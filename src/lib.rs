#![doc = include_str!("../README.md")]

//! # ptth
//!
//! An embeddable HTTP server core that runs on the caller's thread.
//!
//! ## Features
//! - One readiness-driven loop multiplexing every socket, no worker threads
//! - One request per connection; every response closes the connection
//! - Exact-path routes for GET and POST
//! - Static files served relative to a base directory handle
//!
//! ## Example
//! ```no_run
//! use ptth::{ConnectionInfo, Request, Response, Routes, Server, ServerConfig};
//!
//! fn main() -> Result<(), ptth::ServerError> {
//!     let mut routes = Routes::new();
//!     routes.get("/callback", |_: &ConnectionInfo, _: &Request| {
//!         Response::ok("<h1>callback success!</h1>")
//!     })?;
//!
//!     let mut server = Server::init(&ServerConfig::with_port(8080), routes)?;
//!     while server.is_running() {
//!         server.process_once();
//!     }
//!     server.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//! - `Server`: owns the listener, the multiplexer, the route table and the
//!   base directory, and runs one wait-and-dispatch cycle per call
//! - `Multiplexer`: registration table plus blocking wait (`Poller` over mio)
//! - `Routes`: bounded, ordered table of exact (method, path) routes
//! - `StaticFiles`: directory-handle walk for the fallback
//!
//! ## Configuration
//! Server settings can be configured via:
//! - Environment variables (prefixed with `PTTH_`)
//! - Configuration file (`ptth.toml`)
//! - Struct literals over `ServerConfig::default()`
//!
//! ## Features
//! - `signals`: `signal::install` stops a server on SIGINT, SIGQUIT or SIGTERM
//!   (enabled by default)

pub use crate::config::ServerConfig;
pub use crate::error::{ResolveError, ServerError};
pub use crate::http::{Bytes, Method, Payload, Request, Response, Version};
pub use crate::net::{ConnectionInfo, Multiplexer, Poller, Readiness};
pub use crate::router::{Handler, Route, Routes, MAX_ROUTES};
pub use crate::server::{Server, ShutdownHandle};
pub use crate::static_files::StaticFiles;

mod config;
mod error;
pub mod http;
pub mod net;
mod router;
mod server;
#[cfg(feature = "signals")]
pub mod signal;
mod static_files;
