#![forbid(unsafe_code)]
#![doc = "TLS 1.3 client handshake engine."]

pub mod alert;
pub mod config;
pub mod crypt;
pub mod extensions;
pub mod handshake;
pub mod session;

/// TLS protocol version.
///
/// The engine only drives 1.2/1.3 handshakes; the legacy versions exist
/// so version-applicability gates (e.g. signature_algorithms requires at
/// least 1.2) have something to compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// The wire value carried in `supported_versions`.
    pub fn wire(self) -> u16 {
        match self {
            TlsVersion::Tls10 => 0x0301,
            TlsVersion::Tls11 => 0x0302,
            TlsVersion::Tls12 => 0x0303,
            TlsVersion::Tls13 => 0x0304,
        }
    }
}

/// Which TLS 1.3 signaling variant is in effect.
///
/// Both signal a HelloRetryRequest as a ServerHello carrying the sentinel
/// random; they differ in the version value negotiated through
/// `supported_versions`: the draft advertises its draft number under the
/// 0x7f00 prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVariant {
    Draft23,
    Rfc8446,
}

impl TlsVariant {
    /// The `supported_versions` wire value selecting TLS 1.3 under this
    /// variant.
    pub fn tls13_wire(self) -> u16 {
        match self {
            TlsVariant::Draft23 => 0x7f17,
            TlsVariant::Rfc8446 => 0x0304,
        }
    }
}

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);

    /// Returns true if this is a TLS-1.3-class suite.
    pub fn is_tls13(self) -> bool {
        matches!(
            self,
            CipherSuite::TLS_AES_128_GCM_SHA256
                | CipherSuite::TLS_AES_256_GCM_SHA384
                | CipherSuite::TLS_CHACHA20_POLY1305_SHA256
        )
    }
}

/// The role of a TLS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}
