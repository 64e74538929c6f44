//! The event loop.
//!
//! A [`Server`] is driven by its embedder:
//!
//! ```no_run
//! use ptth::{Routes, Server, ServerConfig};
//!
//! let mut server = Server::init(&ServerConfig::with_port(8080), Routes::new())?;
//! while server.is_running() {
//!     server.process_once();
//! }
//! server.shutdown();
//! # Ok::<(), ptth::ServerError>(())
//! ```
//!
//! Each call to [`process_once`](Server::process_once) blocks until the
//! multiplexer reports readiness and then handles the whole batch on the
//! calling thread. Connections are answered once and closed.
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::TcpListener;
use mio::{Interest, Token, Waker};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::{Method, Request, Response};
use crate::net::{self, token, Connection, Lease, Multiplexer, Poller, Readiness};
use crate::router::Routes;
use crate::static_files::StaticFiles;

/// Stops a server from any thread.
///
/// Setting the flag alone is enough for a driver that checks
/// [`Server::is_running`] between iterations; the waker additionally
/// unblocks an iteration that is waiting for readiness.
#[derive(Clone)]
pub struct ShutdownHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Err(err) = self.waker.wake() {
            log::warn!("Failed to wake server loop: {}", err);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("stopped", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// An embeddable single-threaded HTTP server.
pub struct Server<M: Multiplexer = Poller> {
    listener: TcpListener,
    local_addr: SocketAddr,
    mux: M,
    static_files: Option<StaticFiles>,
    routes: Routes,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    ready: Vec<Readiness>,
    recv_buf: Vec<u8>,
    shutdown: ShutdownHandle,
}

impl Server<Poller> {
    /// Binds the listener, opens the base directory and installs `routes`.
    ///
    /// # Errors
    /// Socket creation, bind, listen and multiplexer failures are fatal.
    /// A base directory that cannot be opened is logged and every static
    /// lookup then answers 404.
    pub fn init(config: &ServerConfig, routes: Routes) -> Result<Server<Poller>> {
        let mux = Poller::new(config.events_capacity).map_err(ServerError::Multiplexer)?;
        Server::with_multiplexer(config, routes, mux)
    }
}

impl<M: Multiplexer> Server<M> {
    /// Like [`Server::init`], over a caller-supplied multiplexer.
    pub fn with_multiplexer(config: &ServerConfig, routes: Routes, mut mux: M) -> Result<Server<M>> {
        let addr = config.listen_addr()?;
        let mut listener = net::bind_listener(addr, config.backlog)?;
        let local_addr = listener.local_addr().map_err(ServerError::Socket)?;

        mux.register(&mut listener, token::LISTENER, Interest::READABLE)
            .map_err(ServerError::Registration)?;
        let waker = mux.waker(token::WAKER).map_err(ServerError::Registration)?;
        log::info!("Started server on {}", local_addr);

        let root = config.static_root();
        let static_files = match StaticFiles::open(&root) {
            Ok(files) => {
                log::info!("Serving files from {}", files.root().display());
                Some(files)
            }
            Err(err) => {
                log::error!("Failed to open base directory {}: {}", root.display(), err);
                None
            }
        };

        Ok(Server {
            listener,
            local_addr,
            mux,
            static_files,
            routes,
            connections: HashMap::new(),
            next_token: token::FIRST_CONNECTION,
            ready: Vec::with_capacity(config.events_capacity),
            recv_buf: vec![0; config.recv_buffer_size.max(1)],
            shutdown: ShutdownHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
        })
    }

    /// True until something asks the server to stop.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_shutdown()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of accepted connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Waits for readiness once and handles every reported event in order.
    ///
    /// Nothing escapes this call: failures are logged and cost at most the
    /// connection they happened on.
    pub fn process_once(&mut self) {
        let mut ready = std::mem::take(&mut self.ready);

        match self.mux.wait(&mut ready) {
            Ok(()) => {
                log::trace!("{} events", ready.len());
                for event in &ready {
                    self.handle(event);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => log::error!("Failed to wait for events: {}", err),
        }

        self.ready = ready;
    }

    /// Drives the loop until stopped, then releases everything.
    pub fn run(mut self) {
        while self.is_running() {
            self.process_once();
        }
        self.shutdown();
    }

    /// Releases the listener, every open connection and the base directory.
    pub fn shutdown(self) {
        log::info!("Closing server on {}", self.local_addr);
        drop(self);
    }

    fn stop(&self) {
        self.shutdown.stopped.store(true, Ordering::Release);
    }

    fn handle(&mut self, event: &Readiness) {
        match event.token {
            token::WAKER => log::debug!("Shutdown requested"),
            token::LISTENER => {
                if event.error || event.read_closed {
                    log::info!("Listening socket closed");
                    self.stop();
                } else if event.readable {
                    self.accept();
                }
            }
            peer => {
                if !self.connections.contains_key(&peer) {
                    log::debug!("Event for released connection {}", peer.0);
                } else if event.readable {
                    self.serve(peer);
                } else if event.read_closed || event.error {
                    // peer hangups without data stop the whole server
                    log::warn!("Connection {} closing", peer.0);
                    self.stop();
                    if let Some(connection) = self.connections.remove(&peer) {
                        drop(Lease::new(&mut self.mux, connection));
                    }
                }
            }
        }
    }

    /// Accepts one pending connection and re-arms the listener.
    fn accept(&mut self) {
        match self.listener.accept() {
            Ok((mut stream, peer)) => {
                let token = Token(self.next_token);
                self.next_token += 1;

                match self.mux.register(&mut stream, token, Interest::READABLE | Interest::WRITABLE) {
                    Ok(()) => {
                        log::debug!("New client {} accepted as connection {}", peer, token.0);
                        self.connections.insert(token, Connection::new(token, stream, peer));
                    }
                    Err(err) => log::warn!("Failed to register connection from {}: {}", peer, err),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => log::warn!("Failed to accept connection: {}", err),
        }

        // edge-triggered: re-arming reports the listener again if more are queued
        if let Err(err) = self.mux.reregister(&mut self.listener, token::LISTENER, Interest::READABLE) {
            log::error!("Failed to re-arm listener: {}", err);
        }
    }

    /// Reads one request, answers it and closes the connection.
    fn serve(&mut self, token: Token) {
        let Some(connection) = self.connections.remove(&token) else {
            return;
        };
        let mut lease = Lease::new(&mut self.mux, connection);

        let len = match lease.receive(&mut self.recv_buf) {
            Ok(0) => {
                log::debug!("Connection {} closed by peer", token.0);
                return;
            }
            Ok(len) => len,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                if let Some(connection) = lease.keep() {
                    self.connections.insert(token, connection);
                }
                return;
            }
            Err(err) => {
                log::warn!("Failed to receive on connection {}: {}", token.0, err);
                return;
            }
        };

        let request = Request::parse(&self.recv_buf[..len]);
        log::debug!("Resource: {} ({})", request.path(), request.version());
        lease.set_version(request.version());
        let Some(info) = lease.info() else {
            return;
        };

        let matched = self
            .routes
            .dispatch(&info, &request, |response| lease.respond(&response));

        if matched == 0 && request.method() == Method::Get {
            let response = match &self.static_files {
                Some(files) => match files.resolve(request.path()) {
                    Ok(content) => Response::ok(content),
                    Err(err) => {
                        log::debug!("No file for {}: {}", request.path(), err);
                        Response::not_found()
                    }
                },
                None => Response::not_found(),
            };
            lease.respond(&response);
        }
    }
}

impl<M: Multiplexer> Drop for Server<M> {
    fn drop(&mut self) {
        for (_, connection) in self.connections.drain() {
            drop(Lease::new(&mut self.mux, connection));
        }
        if let Err(err) = self.mux.deregister(&mut self.listener, token::LISTENER) {
            log::warn!("Failed to deregister listener: {}", err);
        }
    }
}

impl<M: Multiplexer> std::fmt::Debug for Server<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("routes", &self.routes)
            .field("connections", &self.connections.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
