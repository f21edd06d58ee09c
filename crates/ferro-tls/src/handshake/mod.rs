//! TLS handshake protocol: message framing, per-handshake context, and
//! the client state machine.

pub mod client;
pub mod codec;

use ferro_codec::ByteCursor;

use crate::alert::Abort;
use crate::config::TlsConfig;
use crate::crypt::{NamedGroup, SignatureScheme};
use crate::extensions::ExtensionBits;
use crate::{TlsRole, TlsVersion};

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
    ChannelId = 203,
    MessageHash = 254,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            4 => HandshakeType::NewSessionTicket,
            5 => HandshakeType::EndOfEarlyData,
            8 => HandshakeType::EncryptedExtensions,
            11 => HandshakeType::Certificate,
            13 => HandshakeType::CertificateRequest,
            15 => HandshakeType::CertificateVerify,
            20 => HandshakeType::Finished,
            24 => HandshakeType::KeyUpdate,
            203 => HandshakeType::ChannelId,
            254 => HandshakeType::MessageHash,
            _ => return None,
        })
    }
}

/// Parse a handshake header: `msg_type(1) || length(u24)`.
/// Returns (type, body, total bytes consumed).
pub fn parse_handshake_header(data: &[u8]) -> Result<(HandshakeType, &[u8], usize), Abort> {
    let mut c = ByteCursor::new(data);
    let type_byte = c.get_u8()?;
    let msg_type = HandshakeType::from_u8(type_byte)
        .ok_or_else(|| Abort::decode_error(format!("unknown handshake type: {type_byte}")))?;
    let body = c.get_u24_length_prefixed()?;
    let total = data.len() - c.len();
    Ok((msg_type, body.remaining(), total))
}

/// Wrap a handshake body with the 4-byte header.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let len = body.len();
    let mut out = Vec::with_capacity(4 + len);
    out.push(msg_type as u8);
    out.push((len >> 16) as u8);
    out.push((len >> 8) as u8);
    out.push(len as u8);
    out.extend_from_slice(body);
    out
}

/// Per-handshake mutable state shared with the extension callbacks.
///
/// Owned by the state machine driver and passed by reference into each
/// extension callback and state function; nothing retains a reference to
/// it past its own call.
pub struct HandshakeContext {
    pub config: TlsConfig,
    pub role: TlsRole,
    /// Fixed once the ServerHello commits to a version.
    pub negotiated_version: Option<TlsVersion>,

    /// One bit per registry index, set when our encoder wrote bytes.
    pub sent: ExtensionBits,
    /// One bit per registry index, set when the peer's hello carried it.
    pub received: ExtensionBits,
    /// Per-handshake GREASE seed; one byte per usage slot.
    pub grease_seed: [u8; 5],

    pub client_random: [u8; 32],
    pub session_id: Vec<u8>,

    /// The group and public value offered in `key_share`.
    pub key_share_group: Option<NamedGroup>,
    pub key_share_public: Vec<u8>,
    /// Group requested by a HelloRetryRequest.
    pub retry_group: Option<NamedGroup>,
    /// Cookie from a HelloRetryRequest, echoed in the second ClientHello.
    pub cookie: Vec<u8>,

    // Negotiation outcomes.
    pub alpn_selected: Option<Vec<u8>>,
    pub sni_acked: bool,
    pub ems_negotiated: bool,
    pub secure_renegotiation: bool,
    pub session_resumed: bool,
    pub early_data_offered: bool,
    pub early_data_accepted: bool,

    // Server-side parse results.
    pub should_ack_sni: bool,
    pub server_hostname: Option<String>,
    pub scsv_seen: bool,
    pub peer_alpn_offers: Vec<Vec<u8>>,
    pub peer_groups: Vec<NamedGroup>,
    pub peer_sigalgs: Vec<SignatureScheme>,
    pub peer_psk_modes: Vec<u8>,
    /// Extensions outside the registry, collected for the custom
    /// extension layer.
    pub unknown_extensions: Vec<(u16, Vec<u8>)>,
}

impl HandshakeContext {
    pub fn new(config: TlsConfig, role: TlsRole) -> Result<Self, Abort> {
        let mut grease_seed = [0u8; 5];
        let mut client_random = [0u8; 32];
        getrandom::getrandom(&mut grease_seed)
            .and_then(|_| getrandom::getrandom(&mut client_random))
            .map_err(|_| Abort::internal_error("random generation failed"))?;
        Ok(Self {
            config,
            role,
            negotiated_version: None,
            sent: ExtensionBits::new(),
            received: ExtensionBits::new(),
            grease_seed,
            client_random,
            session_id: Vec::new(),
            key_share_group: None,
            key_share_public: Vec::new(),
            retry_group: None,
            cookie: Vec::new(),
            alpn_selected: None,
            sni_acked: false,
            ems_negotiated: false,
            secure_renegotiation: false,
            session_resumed: false,
            early_data_offered: false,
            early_data_accepted: false,
            should_ack_sni: false,
            server_hostname: None,
            scsv_seen: false,
            peer_alpn_offers: Vec::new(),
            peer_groups: Vec::new(),
            peer_sigalgs: Vec::new(),
            peer_psk_modes: Vec::new(),
            unknown_extensions: Vec::new(),
        })
    }

    /// The version used for extension applicability decisions: the
    /// negotiated version once fixed, the configured maximum before.
    pub fn effective_version(&self) -> TlsVersion {
        self.negotiated_version.unwrap_or(self.config.max_version)
    }
}
