// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SA provisioning client.
//!
//! The client validates locally, encodes one request, performs one call
//! bounded by the caller's deadline, and returns the remote acknowledgment
//! untouched. It never retries: after [`SaError::DeadlineExceeded`] the SA
//! may or may not exist on the remote.

use crate::connection::Connection;
use crate::error::{SaError, SaResult, ValidationError};
use crate::protocol::{Acknowledgment, AddSaRequest, Call, DelSaRequest};
use crate::sa::{SaDeletionKey, SaDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Issues `AddSA` / `DelSA` over an established [`Connection`].
///
/// Cheap to clone; clones share the connection and their calls are
/// serialized over it.
///
/// # Example
///
/// ```rust,no_run
/// use dpu_ipsec::{connect, IpsecProtocol, SaClient, SaDeletionKey};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), dpu_ipsec::SaError> {
/// let conn = connect("10.0.0.1:50151", "/etc/dpu/tls").await?;
/// let client = SaClient::new(conn);
///
/// let key = SaDeletionKey::new("10.0.0.2", 0x100, IpsecProtocol::Esp);
/// let ack = client.del_sa(&key, Duration::from_secs(10)).await?;
/// println!("{}", ack);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SaClient {
    connection: Arc<Connection>,
}

impl SaClient {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    pub fn from_shared(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Install an SA on the remote.
    ///
    /// Validation failures are returned before any I/O. Advisory lints are
    /// logged and do not block the request.
    pub async fn add_sa(&self, sa: &SaDescriptor, deadline: Duration) -> SaResult<Acknowledgment> {
        check_deadline(deadline)?;
        sa.validate()?;

        for lint in sa.lint() {
            warn!("SA spi={:#x} dst={}: {}", sa.spi, sa.destination, lint);
        }

        debug!(
            "AddSA spi={:#x} src={} dst={} proto={:?} mode={:?}",
            sa.spi, sa.source, sa.destination, sa.protocol, sa.mode
        );
        let result = self
            .connection
            .call(Call::AddSa(AddSaRequest::from(sa)), deadline)
            .await;
        log_outcome("AddSA", sa.spi, &sa.destination, &result);
        result
    }

    /// Remove an SA from the remote.
    ///
    /// A remote "not found" comes back as [`SaError::RemoteRejected`].
    pub async fn del_sa(&self, key: &SaDeletionKey, deadline: Duration) -> SaResult<Acknowledgment> {
        check_deadline(deadline)?;
        key.validate()?;

        debug!(
            "DelSA spi={:#x} src={} dst={} proto={:?}",
            key.spi, key.source, key.destination, key.protocol
        );
        let result = self
            .connection
            .call(Call::DelSa(DelSaRequest::from(key)), deadline)
            .await;
        log_outcome("DelSA", key.spi, &key.destination, &result);
        result
    }

    /// Close the shared connection for every clone.
    pub async fn close(&self) -> SaResult<()> {
        self.connection.close().await
    }
}

fn check_deadline(deadline: Duration) -> Result<(), ValidationError> {
    if deadline.is_zero() {
        return Err(ValidationError::ZeroDeadline);
    }
    Ok(())
}

fn log_outcome(method: &str, spi: u32, destination: &str, result: &SaResult<Acknowledgment>) {
    match result {
        Ok(_) => info!("{} spi={:#x} dst={} accepted", method, spi, destination),
        Err(SaError::RemoteRejected { status, message }) => warn!(
            "{} spi={:#x} dst={} rejected ({}): {}",
            method, spi, destination, status, message
        ),
        Err(e) => warn!("{} spi={:#x} dst={} failed: {}", method, spi, destination, e),
    }
}
