// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DPU IPsec SA provisioning client
//!
//! Installs and removes IPsec Security Associations on a DPU by calling its
//! remote IPsec control service over a mutually authenticated TLS channel.
//!
//! # Features
//!
//! - **SA model**: every SA parameter, closed enumerations with wire codes,
//!   tri-state flags, zeroized key material
//! - **Local validation**: requests missing `(destination, spi, protocol)`
//!   never leave the process
//! - **Deadlines**: every call is bounded; a timed-out call is reported as
//!   indeterminate, never as failed
//! - **Opaque acknowledgments**: the remote's confirmation is returned as-is
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dpu_ipsec::{connect, EncryptionAlgorithm, IntegrityAlgorithm, IpsecMode};
//! use dpu_ipsec::{IpsecProtocol, SaClient, SaDescriptor};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), dpu_ipsec::SaError> {
//! let client = SaClient::new(connect("10.0.0.1:50151", "/etc/dpu/tls").await?);
//!
//! let sa = SaDescriptor::new("10.0.0.2", 0x100, IpsecProtocol::Esp)
//!     .source("10.0.0.1")
//!     .mode(IpsecMode::Tunnel)
//!     .encryption(EncryptionAlgorithm::AesGcm16, vec![0x11; 36])
//!     .integrity(IntegrityAlgorithm::None, Vec::new());
//!
//! let ack = client.add_sa(&sa, Duration::from_secs(10)).await?;
//! println!("remote acknowledged: {}", ack);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod sa;
pub mod tls;

pub use client::SaClient;
pub use connection::{connect, ConnectOptions, Connection, Connector, SecureStream};
pub use error::{ErrorKind, SaError, SaResult, ValidationError};
pub use protocol::{Acknowledgment, RemoteStatus};
pub use sa::{
    EncryptionAlgorithm, IntegrityAlgorithm, IpsecMode, IpsecProtocol, KeyMaterial,
    SaDeletionKey, SaDescriptor, SaLint, TriState,
};
pub use tls::{BundlePaths, TlsBundle};
