//! Handshake message encoding/decoding (RFC 8446 Section 4).
//!
//! The ClientHello encoder walks the extension registry; the decoders
//! here cover the message shapes the client state machine consumes.

use ferro_codec::{ByteBuilder, ByteCursor};

use crate::alert::Abort;
use crate::crypt::SignatureScheme;
use crate::extensions::{
    add_client_hello_extensions, check_duplicate_extensions, grease_value, GreaseIndex, PskOffer,
};
use crate::handshake::{wrap_handshake, HandshakeContext, HandshakeType};
use crate::CipherSuite;

/// The sentinel ServerHello.random marking a HelloRetryRequest
/// (RFC 8446 Section 4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
    0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
    0x33, 0x9C,
];

// ---------------------------------------------------------------------------
// ClientHello
// ---------------------------------------------------------------------------

/// Encode a complete ClientHello handshake message (header included).
///
/// When `psk` is given, its binder bytes are written as zeros; the caller
/// patches them with [`psk_binder_offset`] once the partial transcript is
/// known.
pub fn encode_client_hello(
    hs: &mut HandshakeContext,
    psk: Option<&PskOffer>,
) -> Result<Vec<u8>, Abort> {
    let mut out = ByteBuilder::new();
    out.add_u8(HandshakeType::ClientHello as u8);
    out.open_length_prefixed(3);

    // legacy_version pins 1.2; the real version rides supported_versions.
    out.add_u16(0x0303);
    out.add_bytes(&hs.client_random);

    out.open_length_prefixed(1);
    let session_id = hs.session_id.clone();
    out.add_bytes(&session_id);
    out.close_length_prefixed()?;

    out.open_length_prefixed(2);
    if hs.config.grease_enabled {
        out.add_u16(grease_value(hs, GreaseIndex::Cipher));
    }
    let suites = hs.config.cipher_suites.clone();
    for suite in &suites {
        out.add_u16(suite.0);
    }
    out.close_length_prefixed()?;

    // legacy_compression_methods = {null}
    out.add_u8(1);
    out.add_u8(0);

    add_client_hello_extensions(hs, &mut out, psk)?;

    out.close_length_prefixed()?;
    out.finish().map_err(Abort::from)
}

/// Byte offset of the PSK binder value inside an encoded ClientHello.
///
/// The binder is the message tail: `... binders_len(2) || binder_len(1)
/// || binder`. The HMAC covering it runs over everything before the
/// binders list, i.e. `msg[..len - binder_len - 3]`.
pub fn psk_binder_offset(msg: &[u8], binder_len: usize) -> usize {
    msg.len() - binder_len
}

/// The prefix of an encoded ClientHello a PSK binder commits to.
pub fn psk_binder_cover(msg: &[u8], binder_len: usize) -> &[u8] {
    &msg[..msg.len() - binder_len - 3]
}

// ---------------------------------------------------------------------------
// ServerHello
// ---------------------------------------------------------------------------

/// The fixed fields of a ServerHello, extensions left unparsed.
pub struct ServerHelloParts<'a> {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id_echo: &'a [u8],
    pub cipher_suite: CipherSuite,
    pub extensions: ByteCursor<'a>,
}

impl ServerHelloParts<'_> {
    /// True if the random carries the HelloRetryRequest sentinel.
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }
}

/// Parse the fixed ServerHello fields from a handshake body.
///
/// The extensions block must be present and the body fully consumed; a
/// TLS 1.3 ServerHello without extensions is not decodable.
pub fn parse_server_hello_parts(body: &[u8]) -> Result<ServerHelloParts<'_>, Abort> {
    let mut c = ByteCursor::new(body);
    let version = c.get_u16()?;
    let random: [u8; 32] = c.get_array()?;
    let session_id_echo = c.get_u8_length_prefixed()?;
    let cipher_suite = CipherSuite(c.get_u16()?);
    let compression = c.get_u8()?;
    if compression != 0 {
        return Err(Abort::illegal_parameter("nonzero compression method"));
    }
    let extensions = c.get_u16_length_prefixed()?;
    if extensions.is_empty() || !c.is_empty() {
        return Err(Abort::decode_error("ServerHello: bad extensions block"));
    }
    Ok(ServerHelloParts {
        version,
        random,
        session_id_echo: session_id_echo.remaining(),
        cipher_suite,
        extensions,
    })
}

/// Scan an extension block against a closed set of allowed types.
///
/// Rejects duplicates and any type outside `allowed`. Returns the
/// observed `(type, contents)` pairs in wire order.
pub fn scan_restricted_extensions<'a>(
    block: ByteCursor<'a>,
    allowed: &[u16],
) -> Result<Vec<(u16, ByteCursor<'a>)>, Abort> {
    check_duplicate_extensions(block)?;
    let mut out = Vec::new();
    let mut cursor = block;
    while !cursor.is_empty() {
        let ext_type = cursor.get_u16()?;
        let contents = cursor.get_u16_length_prefixed()?;
        if !allowed.contains(&ext_type) {
            return Err(Abort::unsupported_extension(format!(
                "unexpected extension {ext_type}"
            )));
        }
        out.push((ext_type, contents));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// EncryptedExtensions
// ---------------------------------------------------------------------------

/// Split an EncryptedExtensions body into its extension block.
pub fn parse_encrypted_extensions_body(body: &[u8]) -> Result<ByteCursor<'_>, Abort> {
    let mut c = ByteCursor::new(body);
    let block = c.get_u16_length_prefixed()?;
    if !c.is_empty() {
        return Err(Abort::decode_error("EncryptedExtensions: trailing bytes"));
    }
    Ok(block)
}

// ---------------------------------------------------------------------------
// CertificateRequest
// ---------------------------------------------------------------------------

const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
const EXT_CERTIFICATE_AUTHORITIES: u16 = 47;

/// A parsed TLS 1.3 CertificateRequest.
#[derive(Debug)]
pub struct CertificateRequestMsg {
    pub sigalgs: Vec<SignatureScheme>,
}

/// Parse a CertificateRequest body. The request context is always empty
/// during the handshake; `signature_algorithms` is mandatory and
/// `certificate_authorities`, when present, must be non-empty. Unknown
/// extensions are tolerated.
pub fn parse_certificate_request(body: &[u8]) -> Result<CertificateRequestMsg, Abort> {
    let mut c = ByteCursor::new(body);
    let context = c.get_u8_length_prefixed()?;
    if !context.is_empty() {
        return Err(Abort::decode_error(
            "CertificateRequest: nonempty request context",
        ));
    }
    let block = c.get_u16_length_prefixed()?;
    if !c.is_empty() {
        return Err(Abort::decode_error("CertificateRequest: trailing bytes"));
    }
    check_duplicate_extensions(block)?;

    let mut sigalgs = None;
    let mut cursor = block;
    while !cursor.is_empty() {
        let ext_type = cursor.get_u16()?;
        let mut contents = cursor.get_u16_length_prefixed()?;
        match ext_type {
            EXT_SIGNATURE_ALGORITHMS => {
                let mut list = contents.get_u16_length_prefixed()?;
                if list.is_empty() || list.len() % 2 != 0 || !contents.is_empty() {
                    return Err(Abort::decode_error("CertificateRequest: bad sigalgs"));
                }
                let mut schemes = Vec::with_capacity(list.len() / 2);
                while !list.is_empty() {
                    schemes.push(SignatureScheme(list.get_u16()?));
                }
                sigalgs = Some(schemes);
            }
            EXT_CERTIFICATE_AUTHORITIES => {
                let cas = contents.get_u16_length_prefixed()?;
                if cas.is_empty() || !contents.is_empty() {
                    return Err(Abort::decode_error(
                        "CertificateRequest: empty certificate_authorities",
                    ));
                }
            }
            _ => {} // tolerated
        }
    }

    let sigalgs = sigalgs
        .ok_or_else(|| Abort::missing_extension("CertificateRequest without signature_algorithms"))?;
    Ok(CertificateRequestMsg { sigalgs })
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// A parsed TLS 1.3 Certificate message: DER entries, leaf first.
pub struct CertificateMsg {
    pub chain: Vec<Vec<u8>>,
}

/// Parse a Certificate body. Per-entry extensions are structure-checked
/// and otherwise ignored.
pub fn parse_certificate(body: &[u8]) -> Result<CertificateMsg, Abort> {
    let mut c = ByteCursor::new(body);
    let context = c.get_u8_length_prefixed()?;
    if !context.is_empty() {
        return Err(Abort::decode_error("Certificate: nonempty request context"));
    }
    let mut list = c.get_u24_length_prefixed()?;
    if !c.is_empty() {
        return Err(Abort::decode_error("Certificate: trailing bytes"));
    }

    let mut chain = Vec::new();
    while !list.is_empty() {
        let cert = list.get_u24_length_prefixed()?;
        if cert.is_empty() {
            return Err(Abort::decode_error("Certificate: empty entry"));
        }
        let extensions = list.get_u16_length_prefixed()?;
        check_duplicate_extensions(extensions)?;
        chain.push(cert.remaining().to_vec());
    }
    Ok(CertificateMsg { chain })
}

/// Encode a client Certificate message. An empty chain is legal: it
/// declines the server's request.
pub fn encode_certificate(chain: &[Vec<u8>]) -> Result<Vec<u8>, Abort> {
    let mut b = ByteBuilder::new();
    b.add_u8(0); // empty certificate_request_context
    b.open_length_prefixed(3);
    for cert in chain {
        b.open_length_prefixed(3);
        b.add_bytes(cert);
        b.close_length_prefixed()?;
        b.add_u16(0); // no per-entry extensions
    }
    b.close_length_prefixed()?;
    let body = b.finish()?;
    Ok(wrap_handshake(HandshakeType::Certificate, &body))
}

// ---------------------------------------------------------------------------
// CertificateVerify
// ---------------------------------------------------------------------------

/// A parsed CertificateVerify.
pub struct CertificateVerifyMsg {
    pub scheme: SignatureScheme,
    pub signature: Vec<u8>,
}

pub fn parse_certificate_verify(body: &[u8]) -> Result<CertificateVerifyMsg, Abort> {
    let mut c = ByteCursor::new(body);
    let scheme = SignatureScheme(c.get_u16()?);
    let signature = c.get_u16_length_prefixed()?.remaining().to_vec();
    if !c.is_empty() {
        return Err(Abort::decode_error("CertificateVerify: trailing bytes"));
    }
    Ok(CertificateVerifyMsg { scheme, signature })
}

pub fn encode_certificate_verify(scheme: SignatureScheme, signature: &[u8]) -> Result<Vec<u8>, Abort> {
    let mut b = ByteBuilder::new();
    b.add_u16(scheme.0);
    b.open_length_prefixed(2);
    b.add_bytes(signature);
    b.close_length_prefixed()?;
    let body = b.finish()?;
    Ok(wrap_handshake(HandshakeType::CertificateVerify, &body))
}

/// The to-be-signed content for CertificateVerify: 64 spaces, a context
/// string, a zero byte, then the transcript hash (RFC 8446 Section 4.4.3).
pub fn certificate_verify_content(context: &str, transcript_hash: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.extend_from_slice(&[0x20; 64]);
    out.extend_from_slice(context.as_bytes());
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

pub const SERVER_CERT_VERIFY_CONTEXT: &str = "TLS 1.3, server CertificateVerify";
pub const CLIENT_CERT_VERIFY_CONTEXT: &str = "TLS 1.3, client CertificateVerify";

// ---------------------------------------------------------------------------
// Finished / EndOfEarlyData
// ---------------------------------------------------------------------------

pub fn parse_finished(body: &[u8], hash_len: usize) -> Result<Vec<u8>, Abort> {
    if body.len() != hash_len {
        return Err(Abort::decode_error("Finished: bad verify_data length"));
    }
    Ok(body.to_vec())
}

pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    wrap_handshake(HandshakeType::Finished, verify_data)
}

pub fn encode_end_of_early_data() -> Vec<u8> {
    wrap_handshake(HandshakeType::EndOfEarlyData, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use crate::crypt::NamedGroup;
    use crate::handshake::parse_handshake_header;
    use crate::TlsRole;

    fn ctx() -> HandshakeContext {
        let mut hs = HandshakeContext::new(
            TlsConfig::builder().server_name("example.com").build(),
            TlsRole::Client,
        )
        .unwrap();
        hs.key_share_group = Some(NamedGroup::X25519);
        hs.key_share_public = vec![0xAA; 32];
        hs
    }

    #[test]
    fn test_encode_client_hello_shape() {
        let mut hs = ctx();
        let msg = encode_client_hello(&mut hs, None).unwrap();
        let (ty, body, total) = parse_handshake_header(&msg).unwrap();
        assert_eq!(ty, HandshakeType::ClientHello);
        assert_eq!(total, msg.len());

        let mut c = ByteCursor::new(body);
        assert_eq!(c.get_u16().unwrap(), 0x0303);
        let random: [u8; 32] = c.get_array().unwrap();
        assert_eq!(random, hs.client_random);
        let sid = c.get_u8_length_prefixed().unwrap();
        assert!(sid.is_empty());
        let mut suites = c.get_u16_length_prefixed().unwrap();
        assert_eq!(suites.get_u16().unwrap(), 0x1301);
        assert_eq!(c.get_u8().unwrap(), 1);
        assert_eq!(c.get_u8().unwrap(), 0);
        // extensions block consumes the rest
        let ext = c.get_u16_length_prefixed().unwrap();
        assert!(!ext.is_empty());
        assert!(c.is_empty());
    }

    #[test]
    fn test_client_hello_psk_binder_is_tail() {
        let mut hs = ctx();
        let offer = PskOffer {
            identity: vec![0x11; 8],
            obfuscated_ticket_age: 7,
            binder_len: 32,
        };
        let msg = encode_client_hello(&mut hs, Some(&offer)).unwrap();
        // The binder tail is zeros awaiting the patch.
        assert_eq!(&msg[psk_binder_offset(&msg, 32)..], &[0u8; 32]);
        // Cover stops right before binders_len(2) || binder_len(1).
        assert_eq!(psk_binder_cover(&msg, 32).len(), msg.len() - 35);
    }

    #[test]
    fn test_server_hello_parts_roundtrip() {
        let mut b = ByteBuilder::new();
        b.add_u16(0x0303);
        b.add_bytes(&[0xBB; 32]);
        b.add_u8(0); // empty session id echo
        b.add_u16(0x1301);
        b.add_u8(0); // compression
        b.open_length_prefixed(2);
        b.add_u16(43); // supported_versions
        b.add_u16(2);
        b.add_u16(0x0304);
        b.close_length_prefixed().unwrap();
        let body = b.finish().unwrap();

        let parts = parse_server_hello_parts(&body).unwrap();
        assert_eq!(parts.version, 0x0303);
        assert_eq!(parts.cipher_suite, CipherSuite::TLS_AES_128_GCM_SHA256);
        assert!(!parts.is_hello_retry_request());
        assert!(parts.session_id_echo.is_empty());
    }

    #[test]
    fn test_server_hello_rejects_empty_extensions() {
        let mut b = ByteBuilder::new();
        b.add_u16(0x0303);
        b.add_bytes(&[0xBB; 32]);
        b.add_u8(0);
        b.add_u16(0x1301);
        b.add_u8(0);
        b.add_u16(0); // empty extensions block
        let body = b.finish().unwrap();
        assert!(parse_server_hello_parts(&body).is_err());
    }

    #[test]
    fn test_server_hello_rejects_trailing_bytes() {
        let mut b = ByteBuilder::new();
        b.add_u16(0x0303);
        b.add_bytes(&[0xBB; 32]);
        b.add_u8(0);
        b.add_u16(0x1301);
        b.add_u8(0);
        b.open_length_prefixed(2);
        b.add_u16(43);
        b.add_u16(2);
        b.add_u16(0x0304);
        b.close_length_prefixed().unwrap();
        b.add_u8(0xFF); // trailing garbage
        let body = b.finish().unwrap();
        assert!(parse_server_hello_parts(&body).is_err());
    }

    #[test]
    fn test_hrr_sentinel_detection() {
        let mut b = ByteBuilder::new();
        b.add_u16(0x0303);
        b.add_bytes(&HELLO_RETRY_REQUEST_RANDOM);
        b.add_u8(0);
        b.add_u16(0x1301);
        b.add_u8(0);
        b.open_length_prefixed(2);
        b.add_u16(51);
        b.add_u16(2);
        b.add_u16(NamedGroup::SECP256R1.0);
        b.close_length_prefixed().unwrap();
        let body = b.finish().unwrap();
        assert!(parse_server_hello_parts(&body)
            .unwrap()
            .is_hello_retry_request());
    }

    #[test]
    fn test_scan_restricted_rejects_unknown_and_duplicate() {
        let mut b = ByteBuilder::new();
        b.add_u16(51);
        b.add_u16(2);
        b.add_u16(0x001D);
        let block = b.finish().unwrap();
        let found =
            scan_restricted_extensions(ByteCursor::new(&block), &[51, 43, 41]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 51);

        // Unknown type.
        assert!(scan_restricted_extensions(ByteCursor::new(&block), &[43]).is_err());

        // Duplicate type.
        let mut b = ByteBuilder::new();
        for _ in 0..2 {
            b.add_u16(51);
            b.add_u16(2);
            b.add_u16(0x001D);
        }
        let block = b.finish().unwrap();
        assert!(scan_restricted_extensions(ByteCursor::new(&block), &[51]).is_err());
    }

    #[test]
    fn test_certificate_request_requires_sigalgs() {
        // context(0) || extensions with only certificate_authorities
        let mut b = ByteBuilder::new();
        b.add_u8(0);
        b.open_length_prefixed(2);
        b.add_u16(EXT_CERTIFICATE_AUTHORITIES);
        b.add_u16(5);
        b.add_u16(3);
        b.add_bytes(&[1, 2, 3]);
        b.close_length_prefixed().unwrap();
        let body = b.finish().unwrap();
        let err = parse_certificate_request(&body).unwrap_err();
        assert_eq!(err.alert, crate::alert::AlertDescription::MissingExtension);
    }

    #[test]
    fn test_certificate_request_parse() {
        let mut b = ByteBuilder::new();
        b.add_u8(0);
        b.open_length_prefixed(2);
        b.add_u16(EXT_SIGNATURE_ALGORITHMS);
        b.add_u16(6);
        b.add_u16(4);
        b.add_u16(0x0403);
        b.add_u16(0x0804);
        b.add_u16(0xFF02); // unknown extension, tolerated
        b.add_u16(0);
        b.close_length_prefixed().unwrap();
        let body = b.finish().unwrap();
        let req = parse_certificate_request(&body).unwrap();
        assert_eq!(
            req.sigalgs,
            vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PSS_RSAE_SHA256
            ]
        );
    }

    #[test]
    fn test_certificate_request_nonempty_context_rejected() {
        let body = [0x02, 0xAA, 0xBB, 0x00, 0x00];
        assert!(parse_certificate_request(&body).is_err());
    }

    #[test]
    fn test_certificate_roundtrip() {
        let chain = vec![vec![0x30, 0x82, 0x01, 0x00], vec![0x30, 0x03]];
        let msg = encode_certificate(&chain).unwrap();
        let (ty, body, _) = parse_handshake_header(&msg).unwrap();
        assert_eq!(ty, HandshakeType::Certificate);
        let parsed = parse_certificate(body).unwrap();
        assert_eq!(parsed.chain, chain);
    }

    #[test]
    fn test_empty_certificate_message() {
        let msg = encode_certificate(&[]).unwrap();
        let (_, body, _) = parse_handshake_header(&msg).unwrap();
        let parsed = parse_certificate(body).unwrap();
        assert!(parsed.chain.is_empty());
    }

    #[test]
    fn test_certificate_verify_roundtrip() {
        let sig = vec![0x5A; 64];
        let msg = encode_certificate_verify(SignatureScheme::ED25519, &sig).unwrap();
        let (ty, body, _) = parse_handshake_header(&msg).unwrap();
        assert_eq!(ty, HandshakeType::CertificateVerify);
        let parsed = parse_certificate_verify(body).unwrap();
        assert_eq!(parsed.scheme, SignatureScheme::ED25519);
        assert_eq!(parsed.signature, sig);
    }

    #[test]
    fn test_certificate_verify_content_layout() {
        let content = certificate_verify_content(SERVER_CERT_VERIFY_CONTEXT, &[0xAB; 32]);
        assert_eq!(&content[..64], &[0x20; 64]);
        assert_eq!(
            &content[64..64 + SERVER_CERT_VERIFY_CONTEXT.len()],
            SERVER_CERT_VERIFY_CONTEXT.as_bytes()
        );
        assert_eq!(content[64 + SERVER_CERT_VERIFY_CONTEXT.len()], 0);
        assert_eq!(&content[content.len() - 32..], &[0xAB; 32]);
    }

    #[test]
    fn test_finished_length_check() {
        assert!(parse_finished(&[0u8; 32], 32).is_ok());
        assert!(parse_finished(&[0u8; 31], 32).is_err());
        assert!(parse_finished(&[0u8; 48], 32).is_err());
    }
}
