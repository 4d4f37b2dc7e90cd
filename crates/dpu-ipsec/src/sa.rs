// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security Association data model.
//!
//! [`SaDescriptor`] carries every parameter of one SA as it is handed to the
//! remote IPsec control plane. Algorithm, mode and protocol identifiers are
//! closed enumerations with explicit wire codes; boolean knobs are
//! [`TriState`] so that "explicitly off" and "not provided" never collapse
//! into the same value.
//!
//! The remote service stays the authority on SA semantics. Locally we only
//! enforce what is needed to address an SA at all: `(destination, spi,
//! protocol)`. Suspicious but legal combinations are reported by
//! [`SaDescriptor::lint`] and logged, never rejected.

use crate::error::ValidationError;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

// ============================================================================
// Wire enumerations
// ============================================================================

/// Declares a closed enumeration with numeric wire codes and textual aliases.
///
/// Aliases are matched after lowercasing and mapping `_` to `-`; the first
/// alias is the canonical name used by `Display`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal => [$($alias:literal),+]
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Numeric code sent on the wire.
            pub fn code(self) -> i32 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            /// Canonical lowercase name.
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => wire_enum!(@first $($alias),+),)+
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = ValidationError;

            fn try_from(code: i32) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    _ => Err(ValidationError::UnknownCode { field: $field, code }),
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            /// Accepts a canonical name, an alias, or the numeric code.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if let Ok(code) = trimmed.parse::<i32>() {
                    return Self::try_from(code);
                }
                let normalized = trimmed.to_ascii_lowercase().replace('_', "-");
                match normalized.as_str() {
                    $($($alias)|+ => Ok($name::$variant),)+
                    _ => Err(ValidationError::UnknownName {
                        field: $field,
                        name: trimmed.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
    (@first $first:literal $(, $rest:literal)*) => {
        $first
    };
}

wire_enum! {
    /// Packet protection protocol (IP protocol number on the wire).
    IpsecProtocol, "protocol" {
        /// Encapsulating Security Payload
        Esp = 50 => ["esp"],
        /// Authentication Header
        Ah = 51 => ["ah"],
        /// IP payload compression
        IpComp = 108 => ["ipcomp", "comp"],
    }
}

wire_enum! {
    /// Encapsulation mode.
    IpsecMode, "mode" {
        Transport = 1 => ["transport"],
        Tunnel = 2 => ["tunnel"],
        /// Bound End-to-End Tunnel
        Beet = 3 => ["beet"],
        Pass = 4 => ["pass"],
        Drop = 5 => ["drop"],
    }
}

wire_enum! {
    /// Cipher, identified by its IKEv2 transform ID.
    EncryptionAlgorithm, "encryption algorithm" {
        Des = 2 => ["des", "des-cbc"],
        TripleDes = 3 => ["3des", "3des-cbc", "des3"],
        Null = 11 => ["null"],
        AesCbc = 12 => ["aes-cbc", "aes"],
        AesCtr = 13 => ["aes-ctr"],
        AesCcm8 = 14 => ["aes-ccm8", "aes-ccm-8"],
        AesCcm12 = 15 => ["aes-ccm12", "aes-ccm-12"],
        AesCcm16 = 16 => ["aes-ccm16", "aes-ccm-16", "aes-ccm"],
        AesGcm8 = 18 => ["aes-gcm8", "aes-gcm-8"],
        AesGcm12 = 19 => ["aes-gcm12", "aes-gcm-12"],
        AesGcm16 = 20 => ["aes-gcm16", "aes-gcm-16", "aes-gcm"],
        NullAuthAesGmac = 21 => ["null-auth-aes-gmac", "aes-gmac"],
        CamelliaCbc = 23 => ["camellia-cbc", "camellia"],
        ChaCha20Poly1305 = 28 => ["chacha20-poly1305", "chacha20poly1305"],
    }
}

wire_enum! {
    /// Integrity (MAC) algorithm, identified by its IKEv2 transform ID.
    IntegrityAlgorithm, "integrity algorithm" {
        None = 0 => ["none"],
        HmacMd5_96 = 1 => ["hmac-md5-96", "md5"],
        HmacSha1_96 = 2 => ["hmac-sha1-96", "sha1"],
        AesXcbc96 = 5 => ["aes-xcbc-96", "aes-xcbc"],
        AesCmac96 = 8 => ["aes-cmac-96", "aes-cmac"],
        Aes128Gmac = 9 => ["aes-128-gmac"],
        Aes192Gmac = 10 => ["aes-192-gmac"],
        Aes256Gmac = 11 => ["aes-256-gmac"],
        HmacSha2_256_128 = 12 => ["hmac-sha2-256-128", "sha256"],
        HmacSha2_384_192 = 13 => ["hmac-sha2-384-192", "sha384"],
        HmacSha2_512_256 = 14 => ["hmac-sha2-512-256", "sha512"],
    }
}

impl EncryptionAlgorithm {
    /// Combined-mode ciphers authenticate on their own.
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            Self::AesCcm8
                | Self::AesCcm12
                | Self::AesCcm16
                | Self::AesGcm8
                | Self::AesGcm12
                | Self::AesGcm16
                | Self::NullAuthAesGmac
                | Self::ChaCha20Poly1305
        )
    }

    /// Whether this cipher needs key material.
    pub fn requires_key(self) -> bool {
        self != Self::Null
    }
}

impl IntegrityAlgorithm {
    pub fn requires_key(self) -> bool {
        self != Self::None
    }
}

// ============================================================================
// Tri-state flags
// ============================================================================

/// A boolean knob that may also be left to the remote's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriState {
    /// Not provided; the remote applies its default.
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl TriState {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::Enabled => Some(true),
            Self::Disabled => Some(false),
        }
    }

    pub fn is_set(self) -> bool {
        self != Self::Unset
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unset, Self::from)
    }
}

impl FromStr for TriState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" | "enable" | "enabled" => Ok(Self::Enabled),
            "false" | "no" | "off" | "0" | "disable" | "disabled" => Ok(Self::Disabled),
            "" | "unset" | "default" => Ok(Self::Unset),
            _ => Err(ValidationError::InvalidTriState(s.to_string())),
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unset => "unset",
            Self::Enabled => "true",
            Self::Disabled => "false",
        })
    }
}

// ============================================================================
// Key material
// ============================================================================

/// Raw symmetric key bytes. Wiped on drop, never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyMaterial(Zeroizing<Vec<u8>>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Decode operator input.
    ///
    /// `0x`-prefixed or even-length all-hex text is hex; anything else is
    /// standard base64 (padding optional). Empty text is an empty key.
    pub fn parse(field: &'static str, text: &str) -> Result<Self, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }

        let invalid = |reason: String| ValidationError::InvalidKey { field, reason };

        if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return hex::decode(digits)
                .map(Self::new)
                .map_err(|e| invalid(format!("bad hex: {}", e)));
        }

        if text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return hex::decode(text)
                .map(Self::new)
                .map_err(|e| invalid(format!("bad hex: {}", e)));
        }

        STANDARD
            .decode(text)
            .or_else(|_| STANDARD_NO_PAD.decode(text))
            .map(Self::new)
            .map_err(|e| invalid(format!("neither hex nor base64: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for KeyMaterial {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes>)", self.0.len())
    }
}

// ============================================================================
// SA descriptor
// ============================================================================

/// Parameters of one Security Association to create on the remote.
///
/// `spi == 0` means "not provided" (SPI 0 is reserved by RFC 4303).
///
/// # Example
///
/// ```
/// use dpu_ipsec::{EncryptionAlgorithm, IntegrityAlgorithm, IpsecMode, IpsecProtocol, SaDescriptor};
///
/// let sa = SaDescriptor::new("10.0.0.2", 256, IpsecProtocol::Esp)
///     .source("10.0.0.1")
///     .mode(IpsecMode::Tunnel)
///     .encryption(EncryptionAlgorithm::AesGcm16, vec![0x11; 36])
///     .integrity(IntegrityAlgorithm::None, Vec::new());
/// assert!(sa.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaDescriptor {
    pub source: String,
    pub destination: String,
    pub spi: u32,
    pub protocol: Option<IpsecProtocol>,
    /// Logical interface binding, 0 = unset.
    pub interface_id: u32,
    /// Groups SAs belonging to one policy.
    pub request_id: u32,
    pub mode: Option<IpsecMode>,
    /// Restricts the policy to a named network interface.
    pub bound_interface: Option<String>,
    pub encryption_algorithm: Option<EncryptionAlgorithm>,
    pub encryption_key: KeyMaterial,
    pub integrity_algorithm: Option<IntegrityAlgorithm>,
    pub integrity_key: KeyMaterial,
    /// Anti-replay window size, 0 disables.
    pub replay_window: u32,
    /// Traffic Flow Confidentiality padding length.
    pub tfc_padding: u32,
    /// UDP encapsulation for NAT traversal.
    pub encapsulate: TriState,
    pub extended_sequence_numbers: TriState,
    pub copy_df: TriState,
    pub copy_ecn: TriState,
    pub copy_dscp: TriState,
    pub initiator: TriState,
    pub inbound: TriState,
    /// The SPI was allocated earlier and is being reused.
    pub update: TriState,
}

impl SaDescriptor {
    /// Create a descriptor with the identifying triple set.
    pub fn new(destination: impl Into<String>, spi: u32, protocol: IpsecProtocol) -> Self {
        Self {
            destination: destination.into(),
            spi,
            protocol: Some(protocol),
            ..Default::default()
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn interface_id(mut self, interface_id: u32) -> Self {
        self.interface_id = interface_id;
        self
    }

    pub fn request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn mode(mut self, mode: IpsecMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn bound_interface(mut self, name: impl Into<String>) -> Self {
        self.bound_interface = Some(name.into());
        self
    }

    pub fn encryption(mut self, algorithm: EncryptionAlgorithm, key: impl Into<KeyMaterial>) -> Self {
        self.encryption_algorithm = Some(algorithm);
        self.encryption_key = key.into();
        self
    }

    pub fn integrity(mut self, algorithm: IntegrityAlgorithm, key: impl Into<KeyMaterial>) -> Self {
        self.integrity_algorithm = Some(algorithm);
        self.integrity_key = key.into();
        self
    }

    pub fn replay_window(mut self, size: u32) -> Self {
        self.replay_window = size;
        self
    }

    pub fn tfc_padding(mut self, length: u32) -> Self {
        self.tfc_padding = length;
        self
    }

    pub fn encapsulate(mut self, value: impl Into<TriState>) -> Self {
        self.encapsulate = value.into();
        self
    }

    pub fn extended_sequence_numbers(mut self, value: impl Into<TriState>) -> Self {
        self.extended_sequence_numbers = value.into();
        self
    }

    pub fn copy_df(mut self, value: impl Into<TriState>) -> Self {
        self.copy_df = value.into();
        self
    }

    pub fn copy_ecn(mut self, value: impl Into<TriState>) -> Self {
        self.copy_ecn = value.into();
        self
    }

    pub fn copy_dscp(mut self, value: impl Into<TriState>) -> Self {
        self.copy_dscp = value.into();
        self
    }

    pub fn initiator(mut self, value: impl Into<TriState>) -> Self {
        self.initiator = value.into();
        self
    }

    pub fn inbound(mut self, value: impl Into<TriState>) -> Self {
        self.inbound = value.into();
        self
    }

    pub fn update(mut self, value: impl Into<TriState>) -> Self {
        self.update = value.into();
        self
    }

    /// Check the fields needed to address the SA remotely.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identity(&self.destination, self.spi, self.protocol)
    }

    /// Project onto the fields that identify this SA for deletion.
    pub fn deletion_key(&self) -> SaDeletionKey {
        SaDeletionKey {
            source: self.source.clone(),
            destination: self.destination.clone(),
            spi: self.spi,
            protocol: self.protocol,
            interface_id: self.interface_id,
        }
    }

    /// Report legal but probably unintended parameter combinations.
    pub fn lint(&self) -> Vec<SaLint> {
        let mut lints = Vec::new();

        if let (Some(cipher), Some(integrity)) = (self.encryption_algorithm, self.integrity_algorithm)
        {
            if cipher.is_aead() && integrity != IntegrityAlgorithm::None {
                lints.push(SaLint::AeadWithIntegrity { cipher, integrity });
            }
        }

        if self.encapsulate.is_enabled() {
            if let Some(protocol) = self.protocol.filter(|p| *p != IpsecProtocol::Esp) {
                lints.push(SaLint::EncapWithoutEsp(protocol));
            }
        }

        match self.encryption_algorithm {
            Some(alg) if alg.requires_key() && self.encryption_key.is_empty() => {
                lints.push(SaLint::MissingKey {
                    field: "encryption_key",
                })
            }
            None if !self.encryption_key.is_empty() => lints.push(SaLint::KeyWithoutAlgorithm {
                field: "encryption_key",
            }),
            _ => {}
        }

        match self.integrity_algorithm {
            Some(alg) if alg.requires_key() && self.integrity_key.is_empty() => {
                lints.push(SaLint::MissingKey {
                    field: "integrity_key",
                })
            }
            None if !self.integrity_key.is_empty() => lints.push(SaLint::KeyWithoutAlgorithm {
                field: "integrity_key",
            }),
            _ => {}
        }

        lints
    }
}

/// Fields identifying an SA for removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaDeletionKey {
    pub source: String,
    pub destination: String,
    pub spi: u32,
    pub protocol: Option<IpsecProtocol>,
    pub interface_id: u32,
}

impl SaDeletionKey {
    pub fn new(destination: impl Into<String>, spi: u32, protocol: IpsecProtocol) -> Self {
        Self {
            destination: destination.into(),
            spi,
            protocol: Some(protocol),
            ..Default::default()
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn interface_id(mut self, interface_id: u32) -> Self {
        self.interface_id = interface_id;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_identity(&self.destination, self.spi, self.protocol)
    }
}

impl From<&SaDescriptor> for SaDeletionKey {
    fn from(sa: &SaDescriptor) -> Self {
        sa.deletion_key()
    }
}

fn check_identity(
    destination: &str,
    spi: u32,
    protocol: Option<IpsecProtocol>,
) -> Result<(), ValidationError> {
    if destination.trim().is_empty() {
        return Err(ValidationError::MissingField("destination"));
    }
    if spi == 0 {
        return Err(ValidationError::MissingField("spi"));
    }
    if protocol.is_none() {
        return Err(ValidationError::MissingField("protocol"));
    }
    Ok(())
}

/// Advisory findings from [`SaDescriptor::lint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaLint {
    /// A combined-mode cipher paired with a separate MAC.
    AeadWithIntegrity {
        cipher: EncryptionAlgorithm,
        integrity: IntegrityAlgorithm,
    },
    /// UDP encapsulation is only defined for ESP.
    EncapWithoutEsp(IpsecProtocol),
    MissingKey { field: &'static str },
    KeyWithoutAlgorithm { field: &'static str },
}

impl fmt::Display for SaLint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AeadWithIntegrity { cipher, integrity } => write!(
                f,
                "AEAD cipher {} combined with integrity algorithm {}",
                cipher, integrity
            ),
            Self::EncapWithoutEsp(protocol) => {
                write!(f, "UDP encapsulation requested for {}", protocol)
            }
            Self::MissingKey { field } => write!(f, "{} is empty", field),
            Self::KeyWithoutAlgorithm { field } => {
                write!(f, "{} given without an algorithm", field)
            }
        }
    }
}
