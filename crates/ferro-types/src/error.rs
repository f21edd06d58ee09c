/// Wire codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes remain than a read (or a declared length) requires.
    ///
    /// Handshake messages arrive whole, so this is never recoverable by
    /// waiting for more input; the parse must be abandoned.
    #[error("truncated: not enough bytes for the requested read")]
    Truncated,
    /// A structurally invalid encoding: bad tag, non-minimal length form,
    /// duplicate extension, trailing garbage.
    #[error("malformed encoding")]
    MalformedEncoding,
    /// A section's byte count does not fit its declared length-prefix width.
    #[error("section length overflows a {width}-byte prefix")]
    LengthOverflow { width: usize },
    /// The builder was finished while a length-prefixed section was open.
    #[error("unflushed length-prefixed section")]
    UnflushedChild,
}

/// TLS handshake errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// The peer violated the protocol: an extension it never offered was
    /// answered, a mandatory extension is missing, a retry re-requested the
    /// group already offered.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Signature, MAC, or binder verification failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("no shared cipher suite")]
    NoSharedCipherSuite,
    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
