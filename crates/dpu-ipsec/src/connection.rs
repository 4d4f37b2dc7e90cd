// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection establishment and the request/response exchange.
//!
//! A [`Connection`] owns one secured stream to one remote endpoint. Calls are
//! serialized over the stream: each one takes the stream lock, writes a
//! request frame, and reads the matching reply, all within the caller's
//! deadline.
//!
//! If the deadline fires after the request was written, the reply may still
//! arrive later and the stream position is no longer known. The handle is
//! then marked unusable and every subsequent call fails with
//! [`SaError::Transport`]; reconnect to continue.

use crate::error::{SaError, SaResult, ValidationError};
use crate::protocol::{
    self, Acknowledgment, Call, FrameError, ReplyFrame, RequestFrame, DEFAULT_MAX_FRAME_SIZE,
};
use crate::tls::{self, TlsBundle};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default bound for TCP connect and TLS handshake, each.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream a [`Connection`] can run over.
pub trait SecureStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SecureStream for T {}

/// Connection establishment options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
    /// Name used for SNI and certificate verification. Defaults to the host
    /// part of the address.
    pub server_name: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            server_name: None,
        }
    }
}

impl ConnectOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Establish a connection with default options.
///
/// `tls_credential_path` is either `cert:key:ca` or a directory holding
/// `client.crt`, `client.key` and `ca.crt`.
pub async fn connect(address: &str, tls_credential_path: &str) -> SaResult<Connection> {
    Connector::default().connect(address, tls_credential_path).await
}

/// Connection factory carrying [`ConnectOptions`].
#[derive(Debug, Clone, Default)]
pub struct Connector {
    options: ConnectOptions,
}

impl Connector {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Load the credential bundle and connect.
    pub async fn connect(&self, address: &str, tls_credential_path: &str) -> SaResult<Connection> {
        parse_address(address)?;
        let bundle = TlsBundle::load(tls_credential_path)?;
        self.connect_with_bundle(address, &bundle).await
    }

    /// Connect using already loaded credential material.
    pub async fn connect_with_bundle(
        &self,
        address: &str,
        bundle: &TlsBundle,
    ) -> SaResult<Connection> {
        let (host, port) = parse_address(address)?;
        let config = bundle.client_config()?;

        let name = self
            .options
            .server_name
            .clone()
            .unwrap_or_else(|| host.to_string());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| SaError::Credential(format!("invalid server name `{}`: {}", name, e)))?;

        let limit = self.options.connect_timeout;
        debug!("Connecting to {} (timeout {:?})", address, limit);
        let tcp = tokio::time::timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                SaError::connection(address, format!("connect timed out after {:?}", limit))
            })?
            .map_err(|e| SaError::connection(address, e))?;
        tcp.set_nodelay(true).map_err(|e| SaError::connection(address, e))?;

        debug!("TCP established to {}, starting TLS handshake as {}", address, name);
        let connector = tokio_rustls::TlsConnector::from(config);
        let tls = tokio::time::timeout(limit, connector.connect(server_name, tcp))
            .await
            .map_err(|_| {
                SaError::connection(address, format!("TLS handshake timed out after {:?}", limit))
            })?
            .map_err(|e| handshake_error(address, e))?;

        info!("Connected to IPsec service at {}", address);
        Ok(Connection::from_stream(tls, address).with_max_frame_size(self.options.max_frame_size))
    }
}

/// A malformed address is a failure to reach the endpoint.
fn parse_address(address: &str) -> SaResult<(&str, u16)> {
    split_host_port(address).map_err(|e| SaError::connection(address, e))
}

/// rustls failures mean the credentials were refused; anything else is the network.
fn handshake_error(address: &str, err: io::Error) -> SaError {
    let rejected = tls::tls_error(&err);
    match rejected {
        Some(tls_err) => {
            SaError::Credential(format!("TLS handshake with {} failed: {}", address, tls_err))
        }
        None => SaError::connection(address, err),
    }
}

/// Split `host:port` (or `[v6]:port`).
pub fn split_host_port(address: &str) -> Result<(&str, u16), ValidationError> {
    let invalid = || ValidationError::InvalidAddress(address.to_string());

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok((host, port))
}

struct Channel {
    stream: Box<dyn SecureStream>,
    /// False while an exchange is in flight, and forever after one is abandoned.
    clean: bool,
}

/// An established channel to the remote IPsec service.
pub struct Connection {
    peer: String,
    channel: Mutex<Channel>,
    next_id: AtomicU64,
    max_frame_size: usize,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap an already secured stream.
    pub fn from_stream<S>(stream: S, peer: impl Into<String>) -> Self
    where
        S: SecureStream + 'static,
    {
        Self {
            peer: peer.into(),
            channel: Mutex::new(Channel {
                stream: Box::new(stream),
                clean: true,
            }),
            next_id: AtomicU64::new(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Remote endpoint this connection was made to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Perform one request/response exchange bounded by `deadline`.
    ///
    /// Lock wait, write and read all count against the deadline.
    pub async fn call(&self, call: Call, deadline: Duration) -> SaResult<Acknowledgment> {
        if deadline.is_zero() {
            return Err(ValidationError::ZeroDeadline.into());
        }
        if self.is_closed() {
            return Err(SaError::transport("connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let request = RequestFrame {
            id,
            deadline_ms: deadline.as_millis().clamp(1, u64::MAX as u128) as u64,
            call,
        };
        let frame = protocol::encode_frame(&request, self.max_frame_size).map_err(|e| match e {
            FrameError::TooLarge { size, max } => {
                SaError::from(ValidationError::RequestTooLarge { size, max })
            }
            other => SaError::from(other),
        })?;

        debug!("{} #{} -> {} ({} bytes)", method, id, self.peer, frame.len());

        let reply = match tokio::time::timeout(deadline, self.exchange(id, &frame)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(
                    "{} #{} to {} exceeded deadline of {:?}, outcome unknown",
                    method, id, self.peer, deadline
                );
                return Err(SaError::DeadlineExceeded(deadline));
            }
        };

        debug!("{} #{} <- {} status {}", method, id, self.peer, reply.status);
        if reply.status.is_ok() {
            Ok(Acknowledgment::from(reply.payload))
        } else {
            Err(SaError::from_status(reply.status, reply.message, deadline))
        }
    }

    async fn exchange(&self, id: u64, frame: &[u8]) -> SaResult<ReplyFrame> {
        let mut channel = self.channel.lock().await;
        if !channel.clean {
            return Err(SaError::transport(
                "connection unusable after an abandoned call, reconnect required",
            ));
        }

        // Stays false if this future is dropped before the reply is read.
        channel.clean = false;
        protocol::write_frame(&mut channel.stream, frame).await?;
        let reply: ReplyFrame =
            protocol::recv_message(&mut channel.stream, self.max_frame_size).await?;

        if reply.id != id {
            return Err(SaError::transport(format!(
                "reply id {} does not match request id {}",
                reply.id, id
            )));
        }
        channel.clean = true;
        Ok(reply)
    }

    /// Shut down the stream. Later calls fail with [`SaError::Transport`].
    pub async fn close(&self) -> SaResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut channel = self.channel.lock().await;
        channel.clean = false;
        channel
            .stream
            .shutdown()
            .await
            .map_err(SaError::transport)?;
        info!("Closed connection to {}", self.peer);
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("max_frame_size", &self.max_frame_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}
