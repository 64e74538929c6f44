//! Socket resources and the readiness multiplexer behind the server loop.
//!
//! Every descriptor the server owns is registered with a [`Multiplexer`]
//! under a [`Token`]. Connections are released through [`Lease`], which
//! deregisters a descriptor before the socket is closed, so the
//! multiplexer never reports readiness for a descriptor that is gone.
use std::io::{self, Read};
use std::net::SocketAddr;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, ServerError};
use crate::http::{self, Response, Version};

/// Reserved tokens.
pub mod token {
    use mio::Token;

    /// The listening socket
    pub const LISTENER: Token = Token(0);
    /// The cross-thread shutdown waker
    pub const WAKER: Token = Token(1);
    /// First token handed to an accepted connection
    pub const FIRST_CONNECTION: usize = 2;
}

/// One readiness notification, detached from the OS event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// The peer shut down its write half, or the socket hung up
    pub read_closed: bool,
    pub error: bool,
}

impl Readiness {
    /// Readiness carrying only a readable flag.
    pub fn readable(token: Token) -> Readiness {
        Readiness {
            token,
            readable: true,
            writable: false,
            read_closed: false,
            error: false,
        }
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Readiness {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            error: event.is_error(),
        }
    }
}

/// A registration table plus a blocking wait.
///
/// [`Poller`] is the OS-backed implementation. The server is generic over
/// this trait so tests can observe the registration lifecycle.
pub trait Multiplexer {
    fn register(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    /// Re-arms a registration; a source that is still ready fires again.
    fn reregister(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    fn deregister(&mut self, source: &mut dyn Source, token: Token) -> io::Result<()>;

    /// Creates a waker that makes [`wait`](Multiplexer::wait) return with `token`.
    fn waker(&self, token: Token) -> io::Result<Waker>;

    /// Blocks until at least one registered source is ready, with no timeout.
    ///
    /// `ready` is cleared and refilled in the order the OS reported events.
    fn wait(&mut self, ready: &mut Vec<Readiness>) -> io::Result<()>;
}

/// The mio-backed multiplexer.
///
/// mio registrations are edge-triggered: an event fires when readiness
/// changes, not while it persists.
pub struct Poller {
    poll: mio::Poll,
    events: Events,
}

impl Poller {
    /// Creates a poller that fetches at most `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Poller> {
        Ok(Poller {
            poll: mio::Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
        })
    }
}

impl Multiplexer for Poller {
    fn register(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    fn reregister(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    fn deregister(&mut self, source: &mut dyn Source, _token: Token) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    fn waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }

    fn wait(&mut self, ready: &mut Vec<Readiness>) -> io::Result<()> {
        ready.clear();
        self.poll.poll(&mut self.events, None)?;
        ready.extend(self.events.iter().map(Readiness::from));
        Ok(())
    }
}

/// Creates, binds and listens on a non-blocking socket for `addr`.
///
/// # Errors
/// Each step maps to its own `ServerError` variant; none is retried.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Socket)?;

    // a restarted server would otherwise fail to bind while old sockets linger
    if let Err(err) = socket.set_reuse_address(true) {
        log::warn!("Failed to set SO_REUSEADDR: {}", err);
    }

    socket.bind(&addr.into()).map_err(ServerError::Bind)?;
    socket.listen(backlog).map_err(ServerError::Listen)?;
    socket.set_nonblocking(true).map_err(ServerError::Socket)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// What a handler may know about the connection it is answering.
///
/// This is a copy; it does not keep the connection alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    token: Token,
    peer: SocketAddr,
    version: Version,
}

impl ConnectionInfo {
    pub fn new(token: Token, peer: SocketAddr, version: Version) -> ConnectionInfo {
        ConnectionInfo { token, peer, version }
    }

    /// Identifier unique among the server's live connections.
    pub fn id(&self) -> usize {
        self.token.0
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn version(&self) -> Version {
        self.version
    }
}

/// An accepted peer socket, exclusively owned from accept to close.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    info: ConnectionInfo,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr) -> Connection {
        Connection {
            stream,
            info: ConnectionInfo::new(token, peer, Version::default()),
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    pub fn token(&self) -> Token {
        self.info.token
    }

    pub fn set_version(&mut self, version: Version) {
        self.info.version = version;
    }

    pub fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// One bounded receive; `Ok(0)` means the peer closed.
    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Serializes `response` onto the socket, logging any failure.
    pub fn respond(&mut self, response: &Response) {
        if let Err(err) = http::send(&mut self.stream, response) {
            log::warn!(
                "Failed to send {} response on connection {}: {}",
                response.code(),
                self.info.id(),
                err
            );
        }
    }
}

/// Deregisters and closes a connection.
fn release<M: Multiplexer + ?Sized>(mux: &mut M, mut connection: Connection) {
    let token = connection.token();
    if let Err(err) = mux.deregister(connection.source(), token) {
        log::warn!("Failed to deregister connection {}: {}", token.0, err);
    }
    log::debug!("Closing connection {}", token.0);
    drop(connection);
}

/// A connection taken out of the server's table while one event is handled.
///
/// Dropping the lease deregisters and then closes the connection, on every
/// path out of the handler. [`keep`](Lease::keep) returns it instead.
pub struct Lease<'m, M: Multiplexer + ?Sized> {
    mux: &'m mut M,
    connection: Option<Connection>,
}

impl<'m, M: Multiplexer + ?Sized> Lease<'m, M> {
    pub fn new(mux: &'m mut M, connection: Connection) -> Self {
        Lease {
            mux,
            connection: Some(connection),
        }
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.connection.as_ref().map(Connection::info)
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.connection.as_mut() {
            Some(connection) => connection.receive(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn set_version(&mut self, version: Version) {
        if let Some(connection) = self.connection.as_mut() {
            connection.set_version(version);
        }
    }

    pub fn respond(&mut self, response: &Response) {
        if let Some(connection) = self.connection.as_mut() {
            connection.respond(response);
        }
    }

    /// Hands the connection back, still registered.
    pub fn keep(mut self) -> Option<Connection> {
        self.connection.take()
    }
}

impl<M: Multiplexer + ?Sized> Drop for Lease<'_, M> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            release(self.mux, connection);
        }
    }
}

/// A multiplexer that records registrations while delegating to [`Poller`].
///
/// Batches pushed onto its [`Script`] are returned by `wait` ahead of real
/// OS events, which reaches readiness combinations a loopback peer cannot
/// produce on demand.
#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Register,
        Reregister,
        Deregister,
    }

    pub type Log = Rc<RefCell<Vec<(Op, Token)>>>;

    pub type Script = Rc<RefCell<VecDeque<Vec<Readiness>>>>;

    pub struct Recording {
        inner: Poller,
        log: Log,
        script: Script,
    }

    impl Recording {
        pub fn new() -> (Recording, Log) {
            let (mux, log, _) = Recording::scripted();
            (mux, log)
        }

        pub fn scripted() -> (Recording, Log, Script) {
            let log = Log::default();
            let script = Script::default();
            let mux = Recording {
                inner: Poller::new(16).unwrap(),
                log: log.clone(),
                script: script.clone(),
            };
            (mux, log, script)
        }
    }

    impl Multiplexer for Recording {
        fn register(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
            self.log.borrow_mut().push((Op::Register, token));
            self.inner.register(source, token, interest)
        }

        fn reregister(&mut self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
            self.log.borrow_mut().push((Op::Reregister, token));
            self.inner.reregister(source, token, interest)
        }

        fn deregister(&mut self, source: &mut dyn Source, token: Token) -> io::Result<()> {
            self.log.borrow_mut().push((Op::Deregister, token));
            self.inner.deregister(source, token)
        }

        fn waker(&self, token: Token) -> io::Result<Waker> {
            self.inner.waker(token)
        }

        fn wait(&mut self, ready: &mut Vec<Readiness>) -> io::Result<()> {
            if let Some(batch) = self.script.borrow_mut().pop_front() {
                ready.clear();
                ready.extend(batch);
                return Ok(());
            }
            self.inner.wait(ready)
        }
    }

    /// Operations recorded against `token`, in order.
    pub fn ops_for(log: &Log, token: Token) -> Vec<Op> {
        log.borrow()
            .iter()
            .filter(|(_, t)| *t == token)
            .map(|(op, _)| *op)
            .collect()
    }
}
