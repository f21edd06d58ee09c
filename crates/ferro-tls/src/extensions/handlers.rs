//! The registry's extension handlers.
//!
//! Each handler is a unit struct implementing the four hello operations.
//! Version applicability is enforced at encode time: an extension that is
//! inapplicable below (or at) the configured version is simply never
//! written, and the sent-bit machinery keeps the peer honest about
//! answering it.

use ferro_codec::{ByteBuilder, ByteCursor};

use crate::alert::Abort;
use crate::crypt::{NamedGroup, SignatureScheme};
use crate::extensions::{grease_value, ExtensionHandler, GreaseIndex};
use crate::handshake::HandshakeContext;
use crate::TlsVersion;

/// Extension type codes.
pub mod ids {
    pub const SERVER_NAME: u16 = 0;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const PADDING: u16 = 21;
    pub const EXTENDED_MASTER_SECRET: u16 = 23;
    pub const PRE_SHARED_KEY: u16 = 41;
    pub const EARLY_DATA: u16 = 42;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const COOKIE: u16 = 44;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 45;
    pub const KEY_SHARE: u16 = 51;
    pub const RENEGOTIATION_INFO: u16 = 0xFF01;
}

/// psk_dhe_ke mode (RFC 8446 Section 4.2.9). The only mode offered: a
/// pure-PSK key exchange would skip the DHE fold entirely.
const PSK_DHE_KE: u8 = 1;

fn expect_empty(contents: &ByteCursor<'_>) -> Result<(), Abort> {
    if !contents.is_empty() {
        return Err(Abort::decode_error("extension content must be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// renegotiation_info (RFC 5746)
// ---------------------------------------------------------------------------

pub struct Renegotiation;

impl ExtensionHandler for Renegotiation {
    fn ext_type(&self) -> u16 {
        ids::RENEGOTIATION_INFO
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // Renegotiation indication is not necessary in TLS 1.3.
        if hs.config.min_version >= TlsVersion::Tls13 {
            return Ok(());
        }
        // Initial handshake: empty renegotiated_connection.
        out.add_u16(ids::RENEGOTIATION_INFO);
        out.add_u16(1);
        out.add_u8(0);
        Ok(())
    }

    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            // Tolerated: in practice every client accepts servers without
            // renegotiation support on the initial handshake.
            return Ok(());
        };
        if hs.effective_version() >= TlsVersion::Tls13 {
            return Err(Abort::illegal_parameter(
                "renegotiation_info at TLS 1.3",
            ));
        }
        let renegotiated = contents.get_u8_length_prefixed()?;
        if !contents.is_empty() {
            return Err(Abort::illegal_parameter("renegotiation encoding error"));
        }
        // Initial handshake: the server's view must be empty too.
        if !renegotiated.is_empty() {
            return Err(Abort::handshake_failure("renegotiation mismatch"));
        }
        hs.secure_renegotiation = true;
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        if hs.effective_version() >= TlsVersion::Tls13 {
            return Ok(());
        }
        let Some(mut contents) = contents else {
            return Ok(());
        };
        let renegotiated = contents.get_u8_length_prefixed()?;
        if !contents.is_empty() {
            return Err(Abort::illegal_parameter("renegotiation encoding error"));
        }
        if !renegotiated.is_empty() {
            return Err(Abort::handshake_failure("renegotiation mismatch"));
        }
        hs.secure_renegotiation = true;
        Ok(())
    }

    fn add_server_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if !hs.secure_renegotiation || hs.effective_version() >= TlsVersion::Tls13 {
            return Ok(());
        }
        out.add_u16(ids::RENEGOTIATION_INFO);
        out.add_u16(1);
        out.add_u8(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// server_name (RFC 6066)
// ---------------------------------------------------------------------------

const NAME_TYPE_HOST: u8 = 0;
const MAX_HOST_NAME_LEN: usize = 255;

pub struct ServerName;

impl ExtensionHandler for ServerName {
    fn ext_type(&self) -> u16 {
        ids::SERVER_NAME
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        let Some(name) = hs.config.server_name.clone() else {
            return Ok(());
        };
        out.add_u16(ids::SERVER_NAME);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2); // server_name_list
        out.add_u8(NAME_TYPE_HOST);
        out.open_length_prefixed(2);
        out.add_bytes(name.as_bytes());
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // The server acknowledges SNI with an empty extension.
        if let Some(contents) = contents {
            expect_empty(&contents)?;
            hs.sni_acked = true;
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        // RFC 6066 made the name list extensible, but a legacy parser bug
        // froze it at a single host_name entry; parse it inextensibly.
        let mut list = contents.get_u16_length_prefixed()?;
        let name_type = list.get_u8()?;
        let host = list.get_u16_length_prefixed()?;
        if !list.is_empty() || !contents.is_empty() {
            return Err(Abort::decode_error("server_name: trailing bytes"));
        }
        let host = host.remaining();
        if name_type != NAME_TYPE_HOST
            || host.is_empty()
            || host.len() > MAX_HOST_NAME_LEN
            || host.contains(&0)
        {
            return Err(Abort::new(
                crate::alert::AlertDescription::UnrecognizedName,
                ferro_types::TlsError::ProtocolViolation("bad server_name".into()),
            ));
        }
        let host = String::from_utf8(host.to_vec())
            .map_err(|_| Abort::decode_error("server_name: not UTF-8"))?;
        hs.server_hostname = Some(host);
        hs.should_ack_sni = true;
        Ok(())
    }

    fn add_server_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if hs.session_resumed || !hs.should_ack_sni {
            return Ok(());
        }
        out.add_u16(ids::SERVER_NAME);
        out.add_u16(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// extended_master_secret (RFC 7627)
// ---------------------------------------------------------------------------

pub struct ExtendedMasterSecret;

impl ExtensionHandler for ExtendedMasterSecret {
    fn ext_type(&self) -> u16 {
        ids::EXTENDED_MASTER_SECRET
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // EMS is implicit in the TLS 1.3 key schedule; it only applies
        // when a 1.2 handshake is still possible.
        if hs.config.min_version >= TlsVersion::Tls13 {
            return Ok(());
        }
        out.add_u16(ids::EXTENDED_MASTER_SECRET);
        out.add_u16(0);
        Ok(())
    }

    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        if let Some(contents) = contents {
            if hs.effective_version() >= TlsVersion::Tls13 {
                return Err(Abort::unsupported_extension(
                    "extended_master_secret at TLS 1.3",
                ));
            }
            expect_empty(&contents)?;
            hs.ems_negotiated = true;
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        if hs.effective_version() >= TlsVersion::Tls13 {
            return Ok(());
        }
        if let Some(contents) = contents {
            expect_empty(&contents)?;
            hs.ems_negotiated = true;
        }
        Ok(())
    }

    fn add_server_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if !hs.ems_negotiated {
            return Ok(());
        }
        out.add_u16(ids::EXTENDED_MASTER_SECRET);
        out.add_u16(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// signature_algorithms (RFC 8446 Section 4.2.3)
// ---------------------------------------------------------------------------

pub struct SignatureAlgorithms;

impl ExtensionHandler for SignatureAlgorithms {
    fn ext_type(&self) -> u16 {
        ids::SIGNATURE_ALGORITHMS
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // The extension exists only from TLS 1.2 on.
        if hs.config.max_version < TlsVersion::Tls12
            || hs.config.signature_algorithms.is_empty()
        {
            return Ok(());
        }
        out.add_u16(ids::SIGNATURE_ALGORITHMS);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        for scheme in &hs.config.signature_algorithms {
            out.add_u16(scheme.0);
        }
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // Servers never echo signature_algorithms.
        if contents.is_some() {
            return Err(Abort::unsupported_extension(
                "signature_algorithms from server",
            ));
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        let mut list = contents.get_u16_length_prefixed()?;
        if !contents.is_empty() || list.is_empty() || list.len() % 2 != 0 {
            return Err(Abort::decode_error("signature_algorithms: bad list"));
        }
        hs.peer_sigalgs.clear();
        while !list.is_empty() {
            hs.peer_sigalgs.push(SignatureScheme(list.get_u16()?));
        }
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// application_layer_protocol_negotiation (RFC 7301)
// ---------------------------------------------------------------------------

pub struct Alpn;

impl ExtensionHandler for Alpn {
    fn ext_type(&self) -> u16 {
        ids::ALPN
    }

    fn init(&self, hs: &mut HandshakeContext) {
        hs.alpn_selected = None;
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if hs.config.alpn_protocols.is_empty() {
            return Ok(());
        }
        let protocols = hs.config.alpn_protocols.clone();
        out.add_u16(ids::ALPN);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        for proto in &protocols {
            out.open_length_prefixed(1);
            out.add_bytes(proto);
            out.close_length_prefixed()?;
        }
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        // The list must contain exactly one non-empty protocol name.
        let mut list = contents.get_u16_length_prefixed()?;
        if !contents.is_empty() {
            return Err(Abort::decode_error("alpn: trailing bytes"));
        }
        let name = list.get_u8_length_prefixed()?;
        if name.is_empty() || !list.is_empty() {
            return Err(Abort::decode_error("alpn: not a single protocol"));
        }
        let name = name.remaining();
        if !hs.config.alpn_protocols.iter().any(|p| p == name) {
            return Err(Abort::illegal_parameter(
                "alpn: server selected an unoffered protocol",
            ));
        }
        hs.alpn_selected = Some(name.to_vec());
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        let mut list = contents.get_u16_length_prefixed()?;
        if !contents.is_empty() || list.is_empty() {
            return Err(Abort::decode_error("alpn: bad list"));
        }
        hs.peer_alpn_offers.clear();
        while !list.is_empty() {
            let name = list.get_u8_length_prefixed()?;
            if name.is_empty() {
                return Err(Abort::decode_error("alpn: empty protocol name"));
            }
            hs.peer_alpn_offers.push(name.remaining().to_vec());
        }
        Ok(())
    }

    fn add_server_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        let Some(selected) = hs.alpn_selected.clone() else {
            return Ok(());
        };
        out.add_u16(ids::ALPN);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        out.open_length_prefixed(1);
        out.add_bytes(&selected);
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// key_share (RFC 8446 Section 4.2.8)
// ---------------------------------------------------------------------------

pub struct KeyShare;

impl ExtensionHandler for KeyShare {
    fn ext_type(&self) -> u16 {
        ids::KEY_SHARE
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        let Some(group) = hs.key_share_group else {
            return Ok(());
        };
        let public = hs.key_share_public.clone();
        out.add_u16(ids::KEY_SHARE);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2); // client_shares
        if hs.config.grease_enabled && hs.retry_group.is_none() {
            // A fake one-byte share ahead of the real one.
            out.add_u16(grease_value(hs, GreaseIndex::Group));
            out.add_u16(1);
            out.add_u8(0);
        }
        out.add_u16(group.0);
        out.open_length_prefixed(2);
        out.add_bytes(&public);
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // The state machine consumes key_share from ServerHello directly;
        // seeing it in any registry-dispatched block is a violation.
        if contents.is_some() {
            return Err(Abort::unsupported_extension("key_share outside ServerHello"));
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        _hs: &mut HandshakeContext,
        _contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // Server-side key share selection happens out of band.
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// psk_key_exchange_modes (RFC 8446 Section 4.2.9)
// ---------------------------------------------------------------------------

pub struct PskKeyExchangeModes;

impl ExtensionHandler for PskKeyExchangeModes {
    fn ext_type(&self) -> u16 {
        ids::PSK_KEY_EXCHANGE_MODES
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // Advertised whenever 1.3 is possible, so the server may issue
        // tickets even on a fresh handshake.
        if hs.config.max_version < TlsVersion::Tls13 {
            return Ok(());
        }
        out.add_u16(ids::PSK_KEY_EXCHANGE_MODES);
        out.add_u16(2);
        out.add_u8(1); // list length
        out.add_u8(PSK_DHE_KE);
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        if contents.is_some() {
            return Err(Abort::unsupported_extension(
                "psk_key_exchange_modes from server",
            ));
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        let modes = contents.get_u8_length_prefixed()?;
        if modes.is_empty() || !contents.is_empty() {
            return Err(Abort::decode_error("psk_key_exchange_modes: bad list"));
        }
        hs.peer_psk_modes = modes.remaining().to_vec();
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// early_data (RFC 8446 Section 4.2.10)
// ---------------------------------------------------------------------------

pub struct EarlyData;

impl ExtensionHandler for EarlyData {
    fn ext_type(&self) -> u16 {
        ids::EARLY_DATA
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // The state machine clears the offer after a HelloRetryRequest: a
        // retry invalidates the early-data key schedule.
        if !hs.early_data_offered || hs.retry_group.is_some() || !hs.cookie.is_empty() {
            return Ok(());
        }
        out.add_u16(ids::EARLY_DATA);
        out.add_u16(0);
        Ok(())
    }

    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(contents) = contents else {
            return Ok(());
        };
        expect_empty(&contents)?;
        if !hs.session_resumed {
            return Err(Abort::unsupported_extension(
                "early_data accepted without resumption",
            ));
        }
        hs.early_data_accepted = true;
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(contents) = contents else {
            return Ok(());
        };
        if hs.effective_version() < TlsVersion::Tls13 {
            return Ok(());
        }
        expect_empty(&contents)?;
        hs.early_data_offered = true;
        Ok(())
    }

    fn add_server_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if !hs.early_data_accepted {
            return Ok(());
        }
        out.add_u16(ids::EARLY_DATA);
        out.add_u16(0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// supported_versions (RFC 8446 Section 4.2.1)
// ---------------------------------------------------------------------------

pub struct SupportedVersions;

impl ExtensionHandler for SupportedVersions {
    fn ext_type(&self) -> u16 {
        ids::SUPPORTED_VERSIONS
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if hs.config.max_version < TlsVersion::Tls13 {
            return Ok(());
        }
        let grease = hs
            .config
            .grease_enabled
            .then(|| grease_value(hs, GreaseIndex::Version));
        out.add_u16(ids::SUPPORTED_VERSIONS);
        out.open_length_prefixed(2);
        out.open_length_prefixed(1);
        if let Some(v) = grease {
            out.add_u16(v);
        }
        out.add_u16(hs.config.variant.tls13_wire());
        if hs.config.min_version <= TlsVersion::Tls12 {
            out.add_u16(TlsVersion::Tls12.wire());
        }
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // Version selection is consumed by the state machine before
        // registry dispatch.
        if contents.is_some() {
            return Err(Abort::unsupported_extension(
                "supported_versions outside ServerHello",
            ));
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        _hs: &mut HandshakeContext,
        _contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // Version negotiation happens before extension dispatch.
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// cookie (RFC 8446 Section 4.2.2)
// ---------------------------------------------------------------------------

pub struct Cookie;

impl ExtensionHandler for Cookie {
    fn ext_type(&self) -> u16 {
        ids::COOKIE
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        // Only echoed on the second ClientHello, after a retry supplied
        // one.
        if hs.cookie.is_empty() {
            return Ok(());
        }
        let cookie = hs.cookie.clone();
        out.add_u16(ids::COOKIE);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        out.add_bytes(&cookie);
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        if contents.is_some() {
            return Err(Abort::unsupported_extension(
                "cookie outside HelloRetryRequest",
            ));
        }
        Ok(())
    }

    fn parse_client_hello(
        &self,
        _hs: &mut HandshakeContext,
        _contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// supported_groups (RFC 8446 Section 4.2.7)
//
// Kept last in the registry: the final encoded extension must be
// non-empty for interop with parsers that mishandle a trailing
// zero-length extension.
// ---------------------------------------------------------------------------

pub struct SupportedGroups;

impl ExtensionHandler for SupportedGroups {
    fn ext_type(&self) -> u16 {
        ids::SUPPORTED_GROUPS
    }

    fn add_client_hello(
        &self,
        hs: &mut HandshakeContext,
        out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        if hs.config.supported_groups.is_empty() {
            return Ok(());
        }
        let grease = hs
            .config
            .grease_enabled
            .then(|| grease_value(hs, GreaseIndex::Group));
        let groups = hs.config.supported_groups.clone();
        out.add_u16(ids::SUPPORTED_GROUPS);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        if let Some(v) = grease {
            out.add_u16(v);
        }
        for g in &groups {
            out.add_u16(g.0);
        }
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
        Ok(())
    }

    fn parse_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        // Not expected from servers, but some BigIP versions echo it;
        // tolerate and ignore.
        Ok(())
    }

    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort> {
        let Some(mut contents) = contents else {
            return Ok(());
        };
        let mut list = contents.get_u16_length_prefixed()?;
        if !contents.is_empty() || list.is_empty() || list.len() % 2 != 0 {
            return Err(Abort::decode_error("supported_groups: bad list"));
        }
        hs.peer_groups.clear();
        while !list.is_empty() {
            hs.peer_groups.push(NamedGroup(list.get_u16()?));
        }
        Ok(())
    }

    fn add_server_hello(
        &self,
        _hs: &mut HandshakeContext,
        _out: &mut ByteBuilder,
    ) -> Result<(), Abort> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use crate::TlsRole;

    fn client_ctx(config: TlsConfig) -> HandshakeContext {
        HandshakeContext::new(config, TlsRole::Client).unwrap()
    }

    fn encode_one(hs: &mut HandshakeContext, h: &dyn ExtensionHandler) -> Vec<u8> {
        let mut b = ByteBuilder::new();
        h.add_client_hello(hs, &mut b).unwrap();
        b.finish().unwrap()
    }

    /// Strip the 4-byte extension header, sanity-checking type and length.
    fn contents_of(encoded: &[u8], expect_type: u16) -> Vec<u8> {
        let mut c = ByteCursor::new(encoded);
        assert_eq!(c.get_u16().unwrap(), expect_type);
        let contents = c.get_u16_length_prefixed().unwrap();
        assert!(c.is_empty());
        contents.remaining().to_vec()
    }

    #[test]
    fn test_sni_roundtrip_through_server_parser() {
        let mut client = client_ctx(TlsConfig::builder().server_name("example.com").build());
        let encoded = encode_one(&mut client, &ServerName);
        let contents = contents_of(&encoded, ids::SERVER_NAME);

        let mut server =
            HandshakeContext::new(TlsConfig::builder().build(), TlsRole::Server).unwrap();
        ServerName
            .parse_client_hello(&mut server, Some(ByteCursor::new(&contents)))
            .unwrap();
        assert_eq!(server.server_hostname.as_deref(), Some("example.com"));
        assert!(server.should_ack_sni);
    }

    #[test]
    fn test_sni_rejects_embedded_nul() {
        let mut server =
            HandshakeContext::new(TlsConfig::builder().build(), TlsRole::Server).unwrap();
        // list_len=4: type 0, host len 1, host "\0"
        let contents = [0x00, 0x04, 0x00, 0x00, 0x01, 0x00];
        let err = ServerName
            .parse_client_hello(&mut server, Some(ByteCursor::new(&contents)))
            .unwrap_err();
        assert_eq!(err.alert, crate::alert::AlertDescription::UnrecognizedName);
    }

    #[test]
    fn test_supported_versions_lists_both() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        let encoded = encode_one(&mut hs, &SupportedVersions);
        let contents = contents_of(&encoded, ids::SUPPORTED_VERSIONS);
        // list_len(1) || 0304 || 0303
        assert_eq!(contents, vec![0x04, 0x03, 0x04, 0x03, 0x03]);
    }

    #[test]
    fn test_supported_versions_13_only() {
        let mut hs = client_ctx(
            TlsConfig::builder()
                .min_version(TlsVersion::Tls13)
                .build(),
        );
        let encoded = encode_one(&mut hs, &SupportedVersions);
        let contents = contents_of(&encoded, ids::SUPPORTED_VERSIONS);
        assert_eq!(contents, vec![0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_supported_versions_draft_variant() {
        let mut hs = client_ctx(
            TlsConfig::builder()
                .variant(crate::TlsVariant::Draft23)
                .min_version(TlsVersion::Tls13)
                .build(),
        );
        let encoded = encode_one(&mut hs, &SupportedVersions);
        let contents = contents_of(&encoded, ids::SUPPORTED_VERSIONS);
        assert_eq!(contents, vec![0x02, 0x7F, 0x17]);
    }

    #[test]
    fn test_supported_versions_absent_below_13() {
        let mut hs = client_ctx(
            TlsConfig::builder()
                .max_version(TlsVersion::Tls12)
                .build(),
        );
        assert!(encode_one(&mut hs, &SupportedVersions).is_empty());
    }

    #[test]
    fn test_key_share_single_entry() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.key_share_group = Some(NamedGroup::X25519);
        hs.key_share_public = vec![0xAA; 32];
        let encoded = encode_one(&mut hs, &KeyShare);
        let contents = contents_of(&encoded, ids::KEY_SHARE);

        let mut c = ByteCursor::new(&contents);
        let mut shares = c.get_u16_length_prefixed().unwrap();
        assert!(c.is_empty());
        assert_eq!(shares.get_u16().unwrap(), NamedGroup::X25519.0);
        let key = shares.get_u16_length_prefixed().unwrap();
        assert_eq!(key.remaining(), &[0xAA; 32]);
        assert!(shares.is_empty());
    }

    #[test]
    fn test_key_share_grease_entry_precedes_real() {
        let mut hs = client_ctx(TlsConfig::builder().grease(true).build());
        hs.key_share_group = Some(NamedGroup::X25519);
        hs.key_share_public = vec![0xAA; 32];
        let encoded = encode_one(&mut hs, &KeyShare);
        let contents = contents_of(&encoded, ids::KEY_SHARE);

        let mut c = ByteCursor::new(&contents);
        let mut shares = c.get_u16_length_prefixed().unwrap();
        let fake_group = shares.get_u16().unwrap();
        assert_eq!(fake_group & 0x0f0f, 0x0a0a);
        let fake_key = shares.get_u16_length_prefixed().unwrap();
        assert_eq!(fake_key.remaining(), &[0]);
        assert_eq!(shares.get_u16().unwrap(), NamedGroup::X25519.0);
    }

    #[test]
    fn test_alpn_exactly_one_rule() {
        let config = TlsConfig::builder()
            .alpn_protocols(vec![b"h2".to_vec(), b"http/1.1".to_vec()])
            .build();

        // Server answers with one offered protocol: accepted.
        let mut hs = client_ctx(config.clone());
        let answer = [0x00, 0x03, 0x02, b'h', b'2'];
        Alpn.parse_server_hello(&mut hs, Some(ByteCursor::new(&answer)))
            .unwrap();
        assert_eq!(hs.alpn_selected.as_deref(), Some(b"h2".as_slice()));

        // Unoffered protocol: illegal_parameter.
        let mut hs = client_ctx(config.clone());
        let answer = [0x00, 0x03, 0x02, b'h', b'3'];
        let err = Alpn
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&answer)))
            .unwrap_err();
        assert_eq!(err.alert, crate::alert::AlertDescription::IllegalParameter);

        // Two protocols in the answer: decode error.
        let mut hs = client_ctx(config);
        let answer = [0x00, 0x06, 0x02, b'h', b'2', 0x02, b'h', b'3'];
        assert!(Alpn
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&answer)))
            .is_err());
    }

    #[test]
    fn test_early_data_requires_resumption() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.sent.set(7);
        let err = EarlyData
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[])))
            .unwrap_err();
        assert_eq!(
            err.alert,
            crate::alert::AlertDescription::UnsupportedExtension
        );

        hs.session_resumed = true;
        EarlyData
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[])))
            .unwrap();
        assert!(hs.early_data_accepted);
    }

    #[test]
    fn test_early_data_not_reoffered_after_retry() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.early_data_offered = true;
        hs.retry_group = Some(NamedGroup::SECP256R1);
        assert!(encode_one(&mut hs, &EarlyData).is_empty());
    }

    #[test]
    fn test_renegotiation_initial_handshake_echo() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.negotiated_version = Some(TlsVersion::Tls12);
        // Empty renegotiated_connection: accepted.
        Renegotiation
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[0x00])))
            .unwrap();
        assert!(hs.secure_renegotiation);

        // Non-empty on an initial handshake: handshake_failure.
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.negotiated_version = Some(TlsVersion::Tls12);
        let err = Renegotiation
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[0x02, 0xAA, 0xBB])))
            .unwrap_err();
        assert_eq!(err.alert, crate::alert::AlertDescription::HandshakeFailure);
    }

    #[test]
    fn test_renegotiation_rejected_at_13() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        hs.negotiated_version = Some(TlsVersion::Tls13);
        assert!(Renegotiation
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[0x00])))
            .is_err());
    }

    #[test]
    fn test_ems_version_gates() {
        // Never offered by a 1.3-only client.
        let mut hs = client_ctx(
            TlsConfig::builder()
                .min_version(TlsVersion::Tls13)
                .build(),
        );
        assert!(encode_one(&mut hs, &ExtendedMasterSecret).is_empty());

        // Offered when 1.2 is possible.
        let mut hs = client_ctx(TlsConfig::builder().build());
        assert!(!encode_one(&mut hs, &ExtendedMasterSecret).is_empty());

        // Echo at a negotiated 1.3 connection is rejected.
        hs.negotiated_version = Some(TlsVersion::Tls13);
        assert!(ExtendedMasterSecret
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[])))
            .is_err());

        // Echo at 1.2 negotiates EMS.
        hs.negotiated_version = Some(TlsVersion::Tls12);
        ExtendedMasterSecret
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[])))
            .unwrap();
        assert!(hs.ems_negotiated);
    }

    #[test]
    fn test_sigalgs_parse_client_hello() {
        let mut server =
            HandshakeContext::new(TlsConfig::builder().build(), TlsRole::Server).unwrap();
        let contents = [0x00, 0x04, 0x04, 0x03, 0x08, 0x04];
        SignatureAlgorithms
            .parse_client_hello(&mut server, Some(ByteCursor::new(&contents)))
            .unwrap();
        assert_eq!(
            server.peer_sigalgs,
            vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PSS_RSAE_SHA256
            ]
        );

        // Odd-length list rejected.
        let bad = [0x00, 0x03, 0x04, 0x03, 0x08];
        assert!(SignatureAlgorithms
            .parse_client_hello(&mut server, Some(ByteCursor::new(&bad)))
            .is_err());
    }

    #[test]
    fn test_supported_groups_tolerates_server_echo() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        SupportedGroups
            .parse_server_hello(&mut hs, Some(ByteCursor::new(&[0xFF])))
            .unwrap();
    }

    #[test]
    fn test_cookie_echo_only_when_present() {
        let mut hs = client_ctx(TlsConfig::builder().build());
        assert!(encode_one(&mut hs, &Cookie).is_empty());

        hs.cookie = vec![0xC0, 0x0C];
        let encoded = encode_one(&mut hs, &Cookie);
        let contents = contents_of(&encoded, ids::COOKIE);
        assert_eq!(contents, vec![0x00, 0x02, 0xC0, 0x0C]);
    }
}
