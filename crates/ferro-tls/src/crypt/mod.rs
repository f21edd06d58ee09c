//! Cryptographic parameters and the collaborator seams.
//!
//! Symmetric primitives (hash, HKDF, AEAD) are concrete; asymmetric
//! operations (key exchange, signing, certificate verification) are
//! supplied by the caller through the traits in [`provider`].

pub mod hkdf;
pub mod key_schedule;
pub mod keylog;
pub mod provider;
pub mod transcript;

use crate::CipherSuite;
use ferro_types::TlsError;

/// Hash algorithm backing a cipher suite's PRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }
}

/// Parameters associated with a TLS 1.3 cipher suite.
#[derive(Debug, Clone)]
pub struct CipherSuiteParams {
    /// The cipher suite identifier.
    pub suite: CipherSuite,
    /// PRF hash algorithm.
    pub hash: HashAlg,
    /// AEAD key length in bytes.
    pub key_len: usize,
    /// AEAD IV/nonce length in bytes (always 12 for TLS 1.3).
    pub iv_len: usize,
}

impl CipherSuiteParams {
    /// Look up parameters for a TLS 1.3 cipher suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        match suite {
            CipherSuite::TLS_AES_128_GCM_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                key_len: 16,
                iv_len: 12,
            }),
            CipherSuite::TLS_AES_256_GCM_SHA384 => Ok(Self {
                suite,
                hash: HashAlg::Sha384,
                key_len: 32,
                iv_len: 12,
            }),
            CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                key_len: 32,
                iv_len: 12,
            }),
            _ => Err(TlsError::NoSharedCipherSuite),
        }
    }

    /// Hash output size in bytes.
    pub fn hash_len(&self) -> usize {
        self.hash.output_len()
    }
}

/// TLS named group identifiers (for key exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const SECP384R1: Self = Self(0x0018);
    pub const SECP521R1: Self = Self(0x0019);
    pub const X25519: Self = Self(0x001D);
    pub const X448: Self = Self(0x001E);
}

/// TLS signature scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const RSA_PKCS1_SHA256: Self = Self(0x0401);
    pub const RSA_PKCS1_SHA384: Self = Self(0x0501);
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ECDSA_SECP384R1_SHA384: Self = Self(0x0503);
    pub const RSA_PSS_RSAE_SHA256: Self = Self(0x0804);
    pub const RSA_PSS_RSAE_SHA384: Self = Self(0x0805);
    pub const RSA_PSS_RSAE_SHA512: Self = Self(0x0806);
    pub const ED25519: Self = Self(0x0807);
}
