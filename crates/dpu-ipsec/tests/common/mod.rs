// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(dead_code)] // Each test binary uses a subset

//! In-process stand-in for the DPU IPsec control service.
//!
//! Keeps an SA table keyed by `(dst, spi, proto)`, answers `AddSA`/`DelSA`
//! with the real wire protocol, and records every request it sees.

use dpu_ipsec::protocol::{
    recv_message, send_message, Call, ReplyFrame, RequestFrame, DEFAULT_MAX_FRAME_SIZE,
};
use dpu_ipsec::{Connection, RemoteStatus, SaClient};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde_json::value::RawValue;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

/// How the service treats incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Apply requests to the SA table.
    Normal,
    /// Read requests, never answer.
    Silent,
    /// Apply, then answer after the given delay.
    Slow(Duration),
    /// Answer every request with this status code.
    Status(i32),
    /// Answer with the wrong request id.
    WrongId,
}

#[derive(Clone)]
pub struct FakeIpsecService {
    mode: Mode,
    installed: Arc<Mutex<HashSet<(String, u32, i32)>>>,
    seen: Arc<Mutex<Vec<RequestFrame>>>,
}

impl FakeIpsecService {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            installed: Arc::new(Mutex::new(HashSet::new())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<RequestFrame> {
        self.seen.lock().unwrap().clone()
    }

    pub fn installed_count(&self) -> usize {
        self.installed.lock().unwrap().len()
    }

    pub fn is_installed(&self, dst: &str, spi: u32, proto: i32) -> bool {
        self.installed
            .lock()
            .unwrap()
            .contains(&(dst.to_string(), spi, proto))
    }

    fn handle(&self, req: &RequestFrame) -> ReplyFrame {
        if let Mode::Status(code) = self.mode {
            return ReplyFrame::error(req.id, RemoteStatus::from_i32(code), "injected failure");
        }

        let mut table = self.installed.lock().unwrap();
        match &req.call {
            Call::AddSa(p) => {
                if !table.insert((p.dst.clone(), p.spi, p.proto)) {
                    return ReplyFrame::error(
                        req.id,
                        RemoteStatus::AlreadyExists,
                        format!("SA {}/{:#x} already installed", p.dst, p.spi),
                    );
                }
                ack(req.id, &format!(r#"{{"op":"add","spi":{},"reqid":{}}}"#, p.spi, p.reqid))
            }
            Call::DelSa(p) => {
                if !table.remove(&(p.dst.clone(), p.spi, p.proto)) {
                    return ReplyFrame::error(
                        req.id,
                        RemoteStatus::NotFound,
                        format!("no SA {}/{:#x}", p.dst, p.spi),
                    );
                }
                ack(req.id, &format!(r#"{{"op":"del","spi":{}}}"#, p.spi))
            }
        }
    }

    /// Serve one stream until the peer goes away.
    pub async fn serve<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let req: RequestFrame = match recv_message(&mut stream, DEFAULT_MAX_FRAME_SIZE).await
            {
                Ok(req) => req,
                // Closed, or a frame we cannot parse: drop the stream.
                Err(_) => return,
            };
            self.seen.lock().unwrap().push(req.clone());

            let reply = match self.mode {
                Mode::Silent => continue,
                Mode::Slow(delay) => {
                    let reply = self.handle(&req);
                    tokio::time::sleep(delay).await;
                    reply
                }
                Mode::WrongId => {
                    let mut reply = self.handle(&req);
                    reply.id += 1000;
                    reply
                }
                Mode::Normal | Mode::Status(_) => self.handle(&req),
            };

            if send_message(&mut stream, &reply, DEFAULT_MAX_FRAME_SIZE)
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

fn ack(id: u64, json: &str) -> ReplyFrame {
    ReplyFrame::ok(id, RawValue::from_string(json.to_string()).unwrap())
}

/// Client wired to `service` through an in-memory pipe.
pub fn duplex_client(service: &FakeIpsecService) -> SaClient {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(service.clone().serve(server));
    SaClient::new(Connection::from_stream(client, "duplex"))
}

// ============================================================================
// TLS fixtures
// ============================================================================

pub struct Identity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl Identity {
    pub fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec![
            "127.0.0.1".to_string(),
            "localhost".to_string(),
        ])
        .unwrap();
        Self {
            cert_pem: cert.cert.pem(),
            key_pem: cert.key_pair.serialize_pem(),
        }
    }

    /// Write `client.crt`/`client.key`, trusting `ca` as `ca.crt`.
    pub fn write_bundle(&self, dir: &Path, ca: &Identity) {
        std::fs::write(dir.join("client.crt"), &self.cert_pem).unwrap();
        std::fs::write(dir.join("client.key"), &self.key_pem).unwrap();
        std::fs::write(dir.join("ca.crt"), &ca.cert_pem).unwrap();
    }

    /// Mutual-TLS server config presenting this identity and accepting
    /// clients signed by `client_ca`.
    pub fn server_config(&self, client_ca: &Identity) -> Arc<rustls::ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let certs = CertificateDer::pem_slice_iter(self.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_slice(self.key_pem.as_bytes()).unwrap();

        let mut roots = rustls::RootCertStore::empty();
        for ca in CertificateDer::pem_slice_iter(client_ca.cert_pem.as_bytes()) {
            roots.add(ca.unwrap()).unwrap();
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            provider.clone(),
        )
        .build()
        .unwrap();

        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .unwrap();
        Arc::new(config)
    }
}

/// Accept TLS connections on an ephemeral port and serve each with `service`.
pub async fn spawn_tls_service(
    config: Arc<rustls::ServerConfig>,
    service: &FakeIpsecService,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(config);
    let service = service.clone();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let service = service.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(tcp).await {
                    service.serve(tls).await;
                }
            });
        }
    });

    addr
}
