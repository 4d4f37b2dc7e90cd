// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPsec control-plane wire protocol.
//!
//! Length-prefixed JSON frames carried over the TLS stream:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```
//!
//! Each request carries an `id` that the reply echoes back, the caller's
//! deadline in milliseconds, a `method` (`AddSA` / `DelSA`) and its `params`.
//! Replies carry a numeric `status` (gRPC numbering), an optional diagnostic
//! `message`, and an opaque `payload` that is relayed to the caller as-is.
//!
//! Enumerations travel as their numeric codes, keys as raw byte arrays, and
//! tri-state flags as optional booleans (omitted when unset).

use crate::error::SaError;
use crate::sa::{KeyMaterial, SaDeletionKey, SaDescriptor};
use crate::tls;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ============================================================================
// Requests
// ============================================================================

/// `AddSA` parameters, one field per SA descriptor field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSaRequest {
    #[serde(default)]
    pub src: String,
    pub dst: String,
    pub spi: u32,
    pub proto: i32,
    #[serde(default)]
    pub if_id: u32,
    #[serde(default)]
    pub reqid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_alg: Option<i32>,
    #[serde(default)]
    pub enc_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_alg: Option<i32>,
    #[serde(default)]
    pub int_key: Vec<u8>,
    #[serde(default)]
    pub replay_window: u32,
    #[serde(default)]
    pub tfc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_df: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_ecn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_dscp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<bool>,
}

impl From<&SaDescriptor> for AddSaRequest {
    fn from(sa: &SaDescriptor) -> Self {
        Self {
            src: sa.source.clone(),
            dst: sa.destination.clone(),
            spi: sa.spi,
            proto: sa.protocol.map_or(0, |p| p.code()),
            if_id: sa.interface_id,
            reqid: sa.request_id,
            mode: sa.mode.map(|m| m.code()),
            interface: sa.bound_interface.clone(),
            enc_alg: sa.encryption_algorithm.map(|a| a.code()),
            enc_key: sa.encryption_key.as_bytes().to_vec(),
            int_alg: sa.integrity_algorithm.map(|a| a.code()),
            int_key: sa.integrity_key.as_bytes().to_vec(),
            replay_window: sa.replay_window,
            tfc: sa.tfc_padding,
            encap: sa.encapsulate.as_option(),
            esn: sa.extended_sequence_numbers.as_option(),
            copy_df: sa.copy_df.as_option(),
            copy_ecn: sa.copy_ecn.as_option(),
            copy_dscp: sa.copy_dscp.as_option(),
            initiator: sa.initiator.as_option(),
            inbound: sa.inbound.as_option(),
            update: sa.update.as_option(),
        }
    }
}

impl TryFrom<AddSaRequest> for SaDescriptor {
    type Error = crate::ValidationError;

    /// Decode a request back into a descriptor (remote-side view).
    fn try_from(wire: AddSaRequest) -> Result<Self, Self::Error> {
        let sa = Self {
            source: wire.src,
            destination: wire.dst,
            spi: wire.spi,
            protocol: Some(wire.proto.try_into()?),
            interface_id: wire.if_id,
            request_id: wire.reqid,
            mode: wire.mode.map(TryInto::try_into).transpose()?,
            bound_interface: wire.interface,
            encryption_algorithm: wire.enc_alg.map(TryInto::try_into).transpose()?,
            encryption_key: KeyMaterial::new(wire.enc_key),
            integrity_algorithm: wire.int_alg.map(TryInto::try_into).transpose()?,
            integrity_key: KeyMaterial::new(wire.int_key),
            replay_window: wire.replay_window,
            tfc_padding: wire.tfc,
            encapsulate: wire.encap.into(),
            extended_sequence_numbers: wire.esn.into(),
            copy_df: wire.copy_df.into(),
            copy_ecn: wire.copy_ecn.into(),
            copy_dscp: wire.copy_dscp.into(),
            initiator: wire.initiator.into(),
            inbound: wire.inbound.into(),
            update: wire.update.into(),
        };
        sa.validate()?;
        Ok(sa)
    }
}

/// `DelSA` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelSaRequest {
    #[serde(default)]
    pub src: String,
    pub dst: String,
    pub spi: u32,
    pub proto: i32,
    #[serde(default)]
    pub if_id: u32,
}

impl From<&SaDeletionKey> for DelSaRequest {
    fn from(key: &SaDeletionKey) -> Self {
        Self {
            src: key.source.clone(),
            dst: key.destination.clone(),
            spi: key.spi,
            proto: key.protocol.map_or(0, |p| p.code()),
            if_id: key.interface_id,
        }
    }
}

impl TryFrom<DelSaRequest> for SaDeletionKey {
    type Error = crate::ValidationError;

    fn try_from(wire: DelSaRequest) -> Result<Self, Self::Error> {
        let key = Self {
            source: wire.src,
            destination: wire.dst,
            spi: wire.spi,
            protocol: Some(wire.proto.try_into()?),
            interface_id: wire.if_id,
        };
        key.validate()?;
        Ok(key)
    }
}

/// Remote operation and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    #[serde(rename = "AddSA")]
    AddSa(AddSaRequest),

    #[serde(rename = "DelSA")]
    DelSa(DelSaRequest),
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddSa(_) => "AddSA",
            Self::DelSa(_) => "DelSA",
        }
    }
}

/// One request on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    /// Caller deadline, so the remote can give up early.
    pub deadline_ms: u64,
    #[serde(flatten)]
    pub call: Call,
}

// ============================================================================
// Replies
// ============================================================================

/// Reply status (gRPC numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum RemoteStatus {
    #[default]
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl RemoteStatus {
    /// Convert from i32; unrecognized codes become `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serialize for RemoteStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for RemoteStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::from_i32)
    }
}

/// One reply on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl ReplyFrame {
    /// Successful reply carrying `payload`.
    pub fn ok(id: u64, payload: Box<RawValue>) -> Self {
        Self {
            id,
            status: RemoteStatus::Ok,
            message: None,
            payload: Some(payload),
        }
    }

    /// Failed reply with a diagnostic.
    pub fn error(id: u64, status: RemoteStatus, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            message: Some(message.into()),
            payload: None,
        }
    }
}

/// Confirmation data returned by the remote, relayed without interpretation.
#[derive(Clone, Default)]
pub struct Acknowledgment(Option<Box<RawValue>>);

impl Acknowledgment {
    pub fn new(raw: Box<RawValue>) -> Self {
        Self(Some(raw))
    }

    /// Acknowledgment for a reply that carried no payload.
    pub fn empty() -> Self {
        Self(None)
    }

    /// The payload exactly as the remote sent it (`null` when absent).
    pub fn as_str(&self) -> &str {
        self.0.as_deref().map_or("null", RawValue::get)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str() == "null"
    }

    /// Interpret the payload with a schema known to the caller.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.as_str())
    }
}

impl From<Option<Box<RawValue>>> for Acknowledgment {
    fn from(payload: Option<Box<RawValue>>) -> Self {
        Self(payload)
    }
}

impl fmt::Debug for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Acknowledgment").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for Acknowledgment {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Framing error types.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the stream between frames.
    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame exceeds the configured limit.
    #[error("Message too large: {size} > {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<FrameError> for SaError {
    /// A TLS credential refusal read off the stream stays a credential error;
    /// every other framing failure is a transport failure.
    fn from(e: FrameError) -> Self {
        if let FrameError::Io(io) = &e {
            if let Some(refused) = tls::tls_error(io).filter(|t| tls::is_credential_refusal(t)) {
                return SaError::Credential(format!("TLS peer refused credentials: {}", refused));
            }
        }
        SaError::transport(e)
    }
}

/// Serialize `msg` into a complete frame (length prefix included).
pub fn encode_frame<T: Serialize>(msg: &T, max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(msg)
        .map_err(|e| FrameError::Protocol(format!("Serialize error: {}", e)))?;

    if json.len() > max_frame_size {
        return Err(FrameError::TooLarge {
            size: json.len(),
            max: max_frame_size,
        });
    }

    let mut frame = Vec::with_capacity(4 + json.len());
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Write a pre-encoded frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize and send one message.
pub async fn send_message<W, T>(
    writer: &mut W,
    msg: &T,
    max_frame_size: usize,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let frame = encode_frame(msg, max_frame_size)?;
    write_frame(writer, &frame).await
}

/// Read one frame body.
///
/// Returns [`FrameError::Closed`] on a clean EOF before the length prefix.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(FrameError::Protocol("Empty message".into()));
    }
    if len > max_frame_size {
        return Err(FrameError::TooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read and deserialize one message.
pub async fn recv_message<R, T>(reader: &mut R, max_frame_size: usize) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let body = read_frame(reader, max_frame_size).await?;
    serde_json::from_slice(&body).map_err(|e| FrameError::Protocol(format!("Invalid JSON: {}", e)))
}
