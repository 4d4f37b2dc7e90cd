// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS credential bundle for the IPsec control channel.
//!
//! A bundle is three PEM files: the client certificate chain, its private
//! key, and the CA that signed the remote service certificate. It is named
//! either as `cert:key:ca` or as a directory holding the conventional file
//! names:
//!
//! ```text
//! /etc/dpu/tls/
//! ├── client.crt
//! ├── client.key
//! └── ca.crt
//! ```
//!
//! The resulting rustls client config verifies the server against the bundle
//! CA only (no system roots) and presents the client certificate for mutual
//! TLS.

use crate::error::{SaError, SaResult};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{AlertDescription, ClientConfig, RootCertStore};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Client certificate file name inside a bundle directory.
pub const CLIENT_CERT_FILE: &str = "client.crt";
/// Client key file name inside a bundle directory.
pub const CLIENT_KEY_FILE: &str = "client.key";
/// CA certificate file name inside a bundle directory.
pub const CA_CERT_FILE: &str = "ca.crt";

/// Locations of the three PEM files making up a credential bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl BundlePaths {
    /// Use the conventional file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cert: dir.join(CLIENT_CERT_FILE),
            key: dir.join(CLIENT_KEY_FILE),
            ca: dir.join(CA_CERT_FILE),
        }
    }

    /// Resolve a bundle path: an existing directory, or `cert:key:ca`.
    pub fn parse(locator: &str) -> SaResult<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(SaError::Credential("no TLS credential path given".into()));
        }

        let as_path = Path::new(locator);
        if as_path.is_dir() {
            return Ok(Self::in_dir(as_path));
        }

        let parts: Vec<&str> = locator.split(':').collect();
        match parts.as_slice() {
            [cert, key, ca] if !cert.is_empty() && !key.is_empty() && !ca.is_empty() => {
                Ok(Self {
                    cert: PathBuf::from(cert),
                    key: PathBuf::from(key),
                    ca: PathBuf::from(ca),
                })
            }
            [_] => Err(SaError::Credential(format!(
                "TLS credential directory `{}` does not exist",
                locator
            ))),
            _ => Err(SaError::Credential(format!(
                "TLS credential path `{}` is neither a directory nor cert:key:ca",
                locator
            ))),
        }
    }

    /// Read all three files.
    pub fn load(&self) -> SaResult<TlsBundle> {
        Ok(TlsBundle {
            cert_pem: read_pem(&self.cert)?,
            key_pem: Zeroizing::new(read_pem(&self.key)?),
            ca_pem: read_pem(&self.ca)?,
        })
    }
}

fn read_pem(path: &Path) -> SaResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| SaError::Credential(format!("cannot read {}: {}", path.display(), e)))
}

/// PEM-encoded credential material held in memory.
#[derive(Clone)]
pub struct TlsBundle {
    cert_pem: Vec<u8>,
    key_pem: Zeroizing<Vec<u8>>,
    ca_pem: Vec<u8>,
}

impl TlsBundle {
    /// Resolve and load a bundle from a `cert:key:ca` triple or a directory.
    pub fn load(locator: &str) -> SaResult<Self> {
        BundlePaths::parse(locator)?.load()
    }

    pub fn from_pem(cert_pem: Vec<u8>, key_pem: Vec<u8>, ca_pem: Vec<u8>) -> Self {
        Self {
            cert_pem,
            key_pem: Zeroizing::new(key_pem),
            ca_pem,
        }
    }

    /// Build the rustls client configuration (ring provider, TLS 1.2 and 1.3).
    pub fn client_config(&self) -> SaResult<Arc<ClientConfig>> {
        let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&self.cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| credential("client certificate", e))?;
        if certs.is_empty() {
            return Err(SaError::Credential(
                "no certificates found in client certificate PEM".into(),
            ));
        }

        let key = PrivateKeyDer::from_pem_slice(&self.key_pem)
            .map_err(|e| credential("client key", e))?;

        let mut roots = RootCertStore::empty();
        for ca in CertificateDer::pem_slice_iter(&self.ca_pem) {
            let ca = ca.map_err(|e| credential("CA certificate", e))?;
            roots.add(ca).map_err(|e| credential("CA certificate", e))?;
        }
        if roots.is_empty() {
            return Err(SaError::Credential("no certificates found in CA PEM".into()));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| credential("protocol versions", e))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| credential("client certificate", e))?;

        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TlsBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsBundle")
            .field("cert_pem", &format_args!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("<{} bytes>", self.ca_pem.len()))
            .finish()
    }
}

fn credential(what: &str, err: impl fmt::Display) -> SaError {
    SaError::Credential(format!("invalid {}: {}", what, err))
}

/// The rustls error inside `err`, if the TLS layer produced it.
pub(crate) fn tls_error(err: &io::Error) -> Option<&rustls::Error> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
}

/// Whether `err` means the peer refused our credentials (or we refused its).
///
/// With TLS 1.3 the server verifies the client certificate after the client
/// considers the handshake complete, so the refusal can surface on the first
/// read of an established stream.
pub(crate) fn is_credential_refusal(err: &rustls::Error) -> bool {
    match err {
        rustls::Error::AlertReceived(alert) => matches!(
            alert,
            AlertDescription::BadCertificate
                | AlertDescription::UnsupportedCertificate
                | AlertDescription::CertificateRevoked
                | AlertDescription::CertificateExpired
                | AlertDescription::CertificateUnknown
                | AlertDescription::CertificateRequired
                | AlertDescription::UnknownCA
                | AlertDescription::AccessDenied
                | AlertDescription::DecryptError
        ),
        rustls::Error::InvalidCertificate(_)
        | rustls::Error::NoCertificatesPresented
        | rustls::Error::InvalidCertRevocationList(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn self_signed() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    fn write_bundle(dir: &Path) {
        let (cert, key) = self_signed();
        fs::write(dir.join(CLIENT_CERT_FILE), &cert).unwrap();
        fs::write(dir.join(CLIENT_KEY_FILE), &key).unwrap();
        fs::write(dir.join(CA_CERT_FILE), &cert).unwrap();
    }

    #[test]
    fn test_parse_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BundlePaths::parse(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(paths.cert, dir.path().join("client.crt"));
        assert_eq!(paths.key, dir.path().join("client.key"));
        assert_eq!(paths.ca, dir.path().join("ca.crt"));
    }

    #[test]
    fn test_parse_triple() {
        let paths = BundlePaths::parse("/a/c.pem:/a/k.pem:/a/ca.pem").unwrap();
        assert_eq!(paths.cert, PathBuf::from("/a/c.pem"));
        assert_eq!(paths.key, PathBuf::from("/a/k.pem"));
        assert_eq!(paths.ca, PathBuf::from("/a/ca.pem"));
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        for locator in ["", "/definitely/not/here", "a:b", "a::c", "a:b:c:d"] {
            assert!(
                matches!(BundlePaths::parse(locator), Err(SaError::Credential(_))),
                "{locator:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_directory_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());

        let bundle = TlsBundle::load(dir.path().to_str().unwrap()).unwrap();
        assert!(bundle.client_config().is_ok());
    }

    #[test]
    fn test_load_triple_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let locator = format!(
            "{}:{}:{}",
            dir.path().join(CLIENT_CERT_FILE).display(),
            dir.path().join(CLIENT_KEY_FILE).display(),
            dir.path().join(CA_CERT_FILE).display()
        );

        let bundle = TlsBundle::load(&locator).unwrap();
        assert!(bundle.client_config().is_ok());
    }

    #[test]
    fn test_missing_file_is_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        fs::remove_file(dir.path().join(CLIENT_KEY_FILE)).unwrap();

        let err = TlsBundle::load(dir.path().to_str().unwrap()).unwrap_err();
        match err {
            SaError::Credential(msg) => assert!(msg.contains("client.key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_material() {
        let (cert, key) = self_signed();

        let bundle = TlsBundle::from_pem(
            b"garbage".to_vec(),
            key.clone().into_bytes(),
            cert.clone().into_bytes(),
        );
        assert!(matches!(bundle.client_config(), Err(SaError::Credential(_))));

        let bundle = TlsBundle::from_pem(
            cert.clone().into_bytes(),
            b"garbage".to_vec(),
            cert.clone().into_bytes(),
        );
        assert!(matches!(bundle.client_config(), Err(SaError::Credential(_))));

        let bundle = TlsBundle::from_pem(cert.into_bytes(), key.into_bytes(), Vec::new());
        assert!(matches!(bundle.client_config(), Err(SaError::Credential(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let (cert, key) = self_signed();
        let bundle = TlsBundle::from_pem(
            cert.clone().into_bytes(),
            key.into_bytes(),
            cert.into_bytes(),
        );
        let text = format!("{:?}", bundle);
        assert!(text.contains("redacted"));
        assert!(!text.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_credential_refusal_classification() {
        let wrapped = |e: rustls::Error| io::Error::new(io::ErrorKind::InvalidData, e);

        for alert in [
            AlertDescription::BadCertificate,
            AlertDescription::UnknownCA,
            AlertDescription::CertificateRequired,
            AlertDescription::DecryptError,
            AlertDescription::AccessDenied,
        ] {
            let err = wrapped(rustls::Error::AlertReceived(alert));
            let tls = tls_error(&err).expect("rustls error inside io::Error");
            assert!(is_credential_refusal(tls), "{alert:?}");
        }

        let err = wrapped(rustls::Error::NoCertificatesPresented);
        assert!(tls_error(&err).is_some_and(is_credential_refusal));

        let err = wrapped(rustls::Error::AlertReceived(AlertDescription::InternalError));
        assert!(!tls_error(&err).is_some_and(is_credential_refusal));

        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(tls_error(&err).is_none());
    }
}
