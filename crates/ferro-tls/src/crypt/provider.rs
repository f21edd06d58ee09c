//! Collaborator traits for asymmetric operations.
//!
//! Key exchange, private-key signing, certificate verification, and
//! channel binding are external capabilities. Signing and verification
//! may be asynchronous: a `Retry` outcome suspends the state machine on
//! the same state until the caller re-drives it.

use crate::alert::AlertDescription;
use crate::crypt::{NamedGroup, SignatureScheme};
use ferro_types::TlsError;

/// An in-progress ephemeral key exchange for one named group.
pub trait KeyExchange: Send {
    /// The group this exchange was created for.
    fn group(&self) -> NamedGroup;

    /// The public value to offer in `key_share`.
    fn public_bytes(&self) -> &[u8];

    /// Complete the exchange against the peer's public value.
    ///
    /// A malformed or off-curve peer value fails with the alert to send.
    fn finish(&self, peer_public: &[u8]) -> Result<Vec<u8>, AlertDescription>;
}

/// Creates key exchanges for supported groups.
pub trait KeyExchangeFactory: Send + Sync {
    fn create(&self, group: NamedGroup) -> Result<Box<dyn KeyExchange>, TlsError>;
}

/// Outcome of a private-key signing operation.
pub enum SignOutcome {
    Signature(Vec<u8>),
    /// The backing key operation has not completed; retry the same state.
    Retry,
    Failure,
}

/// Signs handshake material with the client's private key.
pub trait PrivateKeySigner: Send + Sync {
    fn sign(&self, scheme: SignatureScheme, message: &[u8]) -> SignOutcome;
}

/// Outcome of certificate chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Invalid,
    /// An asynchronous check (OCSP, CT log) is pending; retry.
    Retry,
}

/// Verifies the peer's certificate chain and handshake signatures.
pub trait CertificateVerifier: Send + Sync {
    /// Verify the chain (leaf first, DER-encoded).
    fn verify_chain(&self, chain: &[Vec<u8>]) -> VerifyOutcome;

    /// Verify `signature` over `message` with the leaf certificate's key.
    fn verify_signature(
        &self,
        leaf_cert: &[u8],
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> bool;
}

/// Outcome of a channel-binding key lookup.
pub enum ChannelIdOutcome {
    /// The assertion message body, signed over the transcript.
    Assertion(Vec<u8>),
    /// The binding key is not yet available; retry the same state.
    Pending,
    /// No channel binding for this connection.
    Disabled,
}

/// Produces the optional channel-binding assertion sent with the second
/// flight.
pub trait ChannelBinder: Send + Sync {
    fn assert(&self, transcript_hash: &[u8]) -> ChannelIdOutcome;
}
