//! Node connections
//!
//! A [`NodeConnection`] owns exactly one socket to one Redis node and is
//! never shared: its read/write sequencing assumes strict
//! request-then-matching-reply ordering, so driving it from two call chains
//! at once would desynchronize the stream. Concurrency is the host's job,
//! one connection per logical session.
//!
//! The transport behind a connection is abstracted by [`Transport`] and
//! opened through a [`TransportConnector`], which is also the seam test
//! suites use to substitute scripted in-memory transports.

use crate::command::{cmd, Command};
use crate::core::config::{ConnectionParams, ProtocolVersion, Scheme};
use crate::core::error::{RedisError, RedisResult};
use crate::core::types::Role;
use crate::core::value::RespValue;
use crate::protocol::{AggregateHeader, RespDecoder, RespEncoder};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Uniform execute-command contract exposed by every connection and
/// aggregate variant. This is the seam the command-builder and
/// pipeline/transaction layers build on.
pub trait Execute {
    /// Execute one command and return its reply
    ///
    /// # Errors
    ///
    /// Returns connection, protocol or server errors per the implementor's
    /// retry policy.
    fn execute(&mut self, command: &Command) -> RedisResult<RespValue>;
}

/// A blocking byte transport to one node
pub trait Transport: Read + Write + Send {
    /// Apply a read/write timeout to subsequent socket operations;
    /// `None` blocks indefinitely
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut down the underlying stream; further use fails
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// Opens transports for connection parameters
pub trait TransportConnector: Send + Sync {
    /// Open a transport to the node the parameters describe
    ///
    /// # Errors
    ///
    /// Returns a connection error when the node is unreachable, or a
    /// configuration error for schemes this connector does not handle.
    fn open(&self, params: &ConnectionParams) -> RedisResult<Box<dyn Transport>>;
}

/// Default connector: plain TCP and Unix domain sockets.
///
/// The `tls` scheme is parsed and represented in [`ConnectionParams`], but
/// this connector does not terminate TLS; supplying `tls://` parameters
/// without a TLS-capable connector is a configuration error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamConnector;

impl TransportConnector for StreamConnector {
    fn open(&self, params: &ConnectionParams) -> RedisResult<Box<dyn Transport>> {
        match params.scheme {
            Scheme::Tcp => {
                let addr = params.addr();
                let socket_addr = (params.host.as_str(), params.port)
                    .to_socket_addrs()
                    .map_err(|e| RedisError::connection(&addr, e.to_string()))?
                    .next()
                    .ok_or_else(|| {
                        RedisError::connection(&addr, "hostname did not resolve")
                    })?;
                let stream = TcpStream::connect_timeout(&socket_addr, params.connect_timeout)
                    .map_err(|e| RedisError::connection(&addr, e.to_string()))?;
                stream
                    .set_read_timeout(params.read_write_timeout)
                    .and_then(|()| stream.set_write_timeout(params.read_write_timeout))
                    .map_err(|e| RedisError::connection(&addr, e.to_string()))?;
                if let Some(interval) = params.tcp_keepalive {
                    let socket = socket2::Socket::from(stream);
                    let keepalive = socket2::TcpKeepalive::new().with_time(interval);
                    socket.set_tcp_keepalive(&keepalive).map_err(|e| {
                        RedisError::connection(&addr, format!("failed to set keepalive: {e}"))
                    })?;
                    Ok(Box::new(TcpStream::from(socket)))
                } else {
                    Ok(Box::new(stream))
                }
            }
            #[cfg(unix)]
            Scheme::Unix => {
                let path = params.path.clone().ok_or_else(|| {
                    RedisError::Config("Unix scheme requires a socket path".to_string())
                })?;
                let stream = std::os::unix::net::UnixStream::connect(&path)
                    .map_err(|e| RedisError::connection(&path, e.to_string()))?;
                stream
                    .set_read_timeout(params.read_write_timeout)
                    .and_then(|()| stream.set_write_timeout(params.read_write_timeout))
                    .map_err(|e| RedisError::connection(&path, e.to_string()))?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Scheme::Unix => Err(RedisError::Config(
                "Unix sockets are not supported on this platform".to_string(),
            )),
            Scheme::Tls => Err(RedisError::Config(
                "tls:// requires a TLS-capable transport connector".to_string(),
            )),
        }
    }
}

/// Creates [`NodeConnection`]s over a shared transport connector.
///
/// Aggregates hold a factory so that discovery can turn addresses reported
/// by `INFO REPLICATION` or Sentinel into connections with the same
/// credentials and connector.
#[derive(Clone)]
pub struct ConnectionFactory {
    connector: Arc<dyn TransportConnector>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(Arc::new(StreamConnector))
    }
}

impl ConnectionFactory {
    /// Create a factory over a custom connector
    #[must_use]
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self { connector }
    }

    /// Create a connection for the given parameters; the transport is
    /// opened lazily on first use
    #[must_use]
    pub fn create(&self, params: ConnectionParams) -> NodeConnection {
        NodeConnection::with_connector(params, Arc::clone(&self.connector))
    }
}

/// A connection to one Redis node.
///
/// Lifecycle: disconnected → connecting (handshake: `HELLO` or `AUTH`, then
/// `SELECT`) → connected → disconnected again on error or explicit
/// [`disconnect`](NodeConnection::disconnect).
pub struct NodeConnection {
    params: ConnectionParams,
    connector: Arc<dyn TransportConnector>,
    transport: Option<Box<dyn Transport>>,
    read_buffer: BytesMut,
}

impl NodeConnection {
    /// Create a disconnected connection over the default stream connector
    #[must_use]
    pub fn new(params: ConnectionParams) -> Self {
        Self::with_connector(params, Arc::new(StreamConnector))
    }

    /// Create a disconnected connection over a custom connector
    #[must_use]
    pub fn with_connector(params: ConnectionParams, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            params,
            connector,
            transport: None,
            read_buffer: BytesMut::with_capacity(8192),
        }
    }

    /// The parameters this connection was built from
    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Node address (`host:port` or socket path)
    #[must_use]
    pub fn addr(&self) -> String {
        self.params.addr()
    }

    /// Whether the transport is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the transport and run the init handshake.
    ///
    /// Init commands, in order: `HELLO 3 [AUTH user pass]` when protocol 3
    /// is requested, plain `AUTH` when only a password is set, `SELECT`
    /// when a non-default database is requested. Each init reply is
    /// validated; any failure closes the socket and fails the connect as a
    /// whole. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Connection errors from the transport, or server/unexpected-response
    /// errors from the handshake.
    pub fn connect(&mut self) -> RedisResult<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        debug!(addr = %self.addr(), "connecting");
        let transport = self.connector.open(&self.params)?;
        self.transport = Some(transport);
        self.read_buffer.clear();

        for init in self.init_commands() {
            if let Err(e) = self.run_init_command(&init) {
                warn!(addr = %self.addr(), command = init.name(), error = %e, "handshake failed");
                self.disconnect();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close the transport. Idempotent; always safe from error paths.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown();
            debug!(addr = %self.addr(), "disconnected");
        }
        self.read_buffer.clear();
    }

    /// Encode and flush one command frame without waiting for the reply.
    /// Pipelining writes N requests before reading N replies; FIFO reply
    /// ordering per connection makes this safe.
    ///
    /// # Errors
    ///
    /// Connection or timeout errors from the transport.
    pub fn write_request(&mut self, command: &Command) -> RedisResult<()> {
        self.connect()?;
        self.send_frame(command)
    }

    /// Block until one reply frame is available and decode it. Out-of-band
    /// RESP3 push frames are returned like any other reply; use
    /// [`read_reply`](Self::read_reply) to skip them.
    ///
    /// # Errors
    ///
    /// Connection errors, timeouts (which desynchronize the connection),
    /// or protocol errors (which tear it down).
    pub fn read_response(&mut self) -> RedisResult<RespValue> {
        if self.transport.is_none() {
            return Err(RedisError::connection(self.addr(), "not connected"));
        }
        self.read_one_value()
    }

    /// Like [`read_response`](Self::read_response), but skips RESP3 push
    /// frames so that pipelined request/reply pairing is preserved while
    /// out-of-band messages arrive on the same connection
    ///
    /// # Errors
    ///
    /// Same as [`read_response`](Self::read_response).
    pub fn read_reply(&mut self) -> RedisResult<RespValue> {
        loop {
            match self.read_response()? {
                RespValue::Push(message) => {
                    debug!(addr = %self.addr(), len = message.len(), "skipping push frame");
                }
                value => return Ok(value),
            }
        }
    }

    /// Read one reply as a lazily-consumed multi-bulk stream.
    ///
    /// The next frame must be an array; its elements are decoded one at a
    /// time from the socket, so a huge `HGETALL` or `KEYS` reply never has
    /// to be materialized at once. The stream is forward-only and must be
    /// fully drained: dropping it with elements remaining leaves the stream
    /// position meaningless, so the connection is disconnected.
    ///
    /// # Errors
    ///
    /// Connection or protocol errors; a non-array frame is a protocol
    /// error.
    pub fn read_multi_bulk(&mut self) -> RedisResult<MultiBulkReader<'_>> {
        if self.transport.is_none() {
            return Err(RedisError::connection(self.addr(), "not connected"));
        }
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            match RespDecoder::decode_array_header(&mut cursor) {
                Ok(Some(header)) => {
                    let consumed = cursor.position() as usize;
                    self.read_buffer.advance(consumed);
                    let (remaining, is_null) = match header {
                        AggregateHeader::Null => (0, true),
                        AggregateHeader::Elements(n) => (n, false),
                    };
                    return Ok(MultiBulkReader {
                        conn: self,
                        remaining,
                        is_null,
                    });
                }
                Ok(None) => self.fill_buffer()?,
                Err(e) => {
                    self.disconnect();
                    return Err(e);
                }
            }
        }
    }

    /// Query the node's role via `ROLE`
    ///
    /// # Errors
    ///
    /// Connection errors, or an unexpected-response error when the reply
    /// does not name a role.
    pub fn role(&mut self) -> RedisResult<Role> {
        let reply = self.execute(&cmd("ROLE"))?;
        let items = reply.as_array()?;
        let name = items
            .first()
            .ok_or_else(|| RedisError::UnexpectedResponse("empty ROLE reply".to_string()))?
            .as_string()?;
        Role::parse(&name)
            .ok_or_else(|| RedisError::UnexpectedResponse(format!("unknown role: {name}")))
    }

    /// Verify the node's actual role matches the expectation
    ///
    /// # Errors
    ///
    /// [`RedisError::RoleMismatch`] when the server reports another role.
    pub fn verify_role(&mut self, expected: Role) -> RedisResult<()> {
        let actual = self.role()?;
        if actual == expected {
            Ok(())
        } else {
            Err(RedisError::RoleMismatch {
                addr: self.addr(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    fn init_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        match self.params.protocol {
            ProtocolVersion::Resp3 => {
                let mut hello = cmd("HELLO").arg("3");
                if let Some(password) = &self.params.password {
                    let user = self.params.username.clone().unwrap_or_else(|| "default".to_string());
                    hello = hello.arg("AUTH").arg(user).arg(password.clone());
                }
                commands.push(hello);
            }
            ProtocolVersion::Resp2 => {
                if let Some(password) = &self.params.password {
                    let auth = match &self.params.username {
                        Some(user) => cmd("AUTH").arg(user.clone()).arg(password.clone()),
                        None => cmd("AUTH").arg(password.clone()),
                    };
                    commands.push(auth);
                }
            }
        }
        if let Some(database) = self.params.database {
            commands.push(cmd("SELECT").arg(database.to_string()));
        }
        commands
    }

    fn run_init_command(&mut self, command: &Command) -> RedisResult<()> {
        self.send_frame(command)?;
        match self.read_one_value()? {
            RespValue::Error(message) => Err(RedisError::server(message)),
            // HELLO answers with a server property map
            _ if command.name() == "HELLO" => Ok(()),
            reply if reply.is_ok() => Ok(()),
            other => Err(RedisError::UnexpectedResponse(format!(
                "{} handshake reply: {other:?}",
                command.name()
            ))),
        }
    }

    fn send_frame(&mut self, command: &Command) -> RedisResult<()> {
        let addr = self.addr();
        let frame = RespEncoder::encode_command(command);
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| RedisError::connection(addr.clone(), "not connected"))?;
        let result = transport.write_all(&frame).and_then(|()| transport.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(&e) => {
                // A timed-out connection is desynchronized; never reuse it
                self.disconnect();
                Err(RedisError::Timeout(addr))
            }
            Err(e) => Err(RedisError::connection(addr, e.to_string())),
        }
    }

    fn read_one_value(&mut self) -> RedisResult<RespValue> {
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            match RespDecoder::decode(&mut cursor) {
                Ok(Some(value)) => {
                    let consumed = cursor.position() as usize;
                    self.read_buffer.advance(consumed);
                    return Ok(value);
                }
                Ok(None) => self.fill_buffer()?,
                Err(e) => {
                    // A desynchronized stream can never self-recover
                    self.disconnect();
                    return Err(e);
                }
            }
        }
    }

    fn fill_buffer(&mut self) -> RedisResult<()> {
        let addr = self.addr();
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| RedisError::connection(addr.clone(), "not connected"))?;
        let mut chunk = [0u8; 4096];
        match transport.read(&mut chunk) {
            Ok(0) => {
                self.disconnect();
                Err(RedisError::connection(addr, "connection closed by server"))
            }
            Ok(n) => {
                self.read_buffer.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if is_timeout(&e) => {
                self.disconnect();
                Err(RedisError::Timeout(addr))
            }
            Err(e) => Err(RedisError::connection(addr, e.to_string())),
        }
    }
}

impl Execute for NodeConnection {
    /// The common synchronous path: write one request, block for its reply.
    ///
    /// Server error replies are raised as [`RedisError::Server`] unless the
    /// parameters' `raise_server_errors` switch is off, in which case they
    /// come back as [`RespValue::Error`] values.
    fn execute(&mut self, command: &Command) -> RedisResult<RespValue> {
        self.write_request(command)?;
        let reply = self.read_reply()?;
        if let RespValue::Error(message) = reply {
            if self.params.raise_server_errors {
                return Err(RedisError::server(message));
            }
            return Ok(RespValue::Error(message));
        }
        Ok(reply)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Forward-only lazy stream over one multi-bulk reply.
///
/// Produced by [`NodeConnection::read_multi_bulk`]. Not restartable; must
/// be drained. Dropping it early disconnects the connection, since
/// undecoded elements would otherwise be misread as replies to later
/// requests.
pub struct MultiBulkReader<'a> {
    conn: &'a mut NodeConnection,
    remaining: usize,
    is_null: bool,
}

impl MultiBulkReader<'_> {
    /// Whether the reply was the `*-1` null array
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// Elements not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Decode the next element, or `None` once the reply is drained
    ///
    /// # Errors
    ///
    /// Connection or protocol errors while decoding the element.
    pub fn next_item(&mut self) -> RedisResult<Option<RespValue>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let value = self.conn.read_one_value()?;
        self.remaining -= 1;
        Ok(Some(value))
    }
}

impl Drop for MultiBulkReader<'_> {
    fn drop(&mut self) {
        if self.remaining > 0 {
            // Partial consumption forces disconnect: the stream position is
            // meaningless with undecoded elements still inbound
            warn!(
                addr = %self.conn.addr(),
                remaining = self.remaining,
                "multi-bulk reply dropped before drain; disconnecting"
            );
            self.conn.disconnect();
        }
    }
}
