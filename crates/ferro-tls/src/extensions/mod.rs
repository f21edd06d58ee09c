//! The extension registry and hello-codec passes.
//!
//! A fixed, ordered table of extension handlers drives both encode and
//! decode. Order matters twice over: GREASE decoys bracket the real
//! entries, and the final real entry must never be zero-length (some
//! extension-block parsers mishandle a trailing empty extension).

mod handlers;

pub use handlers::ids;

use ferro_codec::{ByteBuilder, ByteCursor};

use crate::alert::Abort;
use crate::handshake::HandshakeContext;
use crate::TlsVersion;

// ---------------------------------------------------------------------------
// Handler trait and registry
// ---------------------------------------------------------------------------

/// One extension's four wire operations plus its per-handshake init hook.
///
/// Parse callbacks receive `None` when the extension was absent from the
/// peer's hello, so an extension can react to its own absence.
pub trait ExtensionHandler {
    /// The 16-bit extension type.
    fn ext_type(&self) -> u16;

    /// Reset per-handshake transient state. Runs before every encode and
    /// decode pass.
    fn init(&self, _hs: &mut HandshakeContext) {}

    /// Append this extension to a ClientHello. Writing nothing omits it.
    fn add_client_hello(&self, hs: &mut HandshakeContext, out: &mut ByteBuilder)
        -> Result<(), Abort>;

    /// Parse this extension from a ServerHello/EncryptedExtensions.
    fn parse_server_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort>;

    /// Parse this extension from a ClientHello.
    fn parse_client_hello(
        &self,
        hs: &mut HandshakeContext,
        contents: Option<ByteCursor<'_>>,
    ) -> Result<(), Abort>;

    /// Append this extension to a ServerHello. Writing nothing omits it.
    fn add_server_hello(&self, hs: &mut HandshakeContext, out: &mut ByteBuilder)
        -> Result<(), Abort>;
}

/// Number of registry entries.
pub const REGISTRY_LEN: usize = 11;

/// The registry, in ClientHello encode order. The final entry
/// (supported_groups) is guaranteed non-empty whenever it is emitted.
static REGISTRY: [&(dyn ExtensionHandler + Sync); REGISTRY_LEN] = [
    &handlers::Renegotiation,
    &handlers::ServerName,
    &handlers::ExtendedMasterSecret,
    &handlers::SignatureAlgorithms,
    &handlers::Alpn,
    &handlers::KeyShare,
    &handlers::PskKeyExchangeModes,
    &handlers::EarlyData,
    &handlers::SupportedVersions,
    &handlers::Cookie,
    &handlers::SupportedGroups,
];

/// One bit of sent/received state per registry entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionBits(u32);

impl ExtensionBits {
    pub const CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < Self::CAPACITY);
        self.0 |= 1 << index;
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < Self::CAPACITY);
        self.0 & (1 << index) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

// The registry must fit the bitset.
const _: () = assert!(REGISTRY_LEN <= ExtensionBits::CAPACITY);

/// Find a handler by extension type. Linear scan; the table is small and
/// fixed.
fn find(ext_type: u16) -> Option<(usize, &'static (dyn ExtensionHandler + Sync))> {
    REGISTRY
        .iter()
        .enumerate()
        .find(|(_, h)| h.ext_type() == ext_type)
        .map(|(i, h)| (i, *h))
}

// ---------------------------------------------------------------------------
// GREASE
// ---------------------------------------------------------------------------

/// GREASE usage slots, one seed byte each.
#[derive(Debug, Clone, Copy)]
pub enum GreaseIndex {
    Cipher = 0,
    Group = 1,
    Extension1 = 2,
    Extension2 = 3,
    Version = 4,
}

/// A GREASE value of the form 0x?a?a, derived from the per-handshake
/// seed so repeated encodes of one handshake are stable.
pub fn grease_value(hs: &HandshakeContext, index: GreaseIndex) -> u16 {
    let v = (hs.grease_seed[index as usize] & 0xf0) | 0x0a;
    u16::from_be_bytes([v, v])
}

// ---------------------------------------------------------------------------
// PSK offer (appended outside the table; must be last)
// ---------------------------------------------------------------------------

/// A pre-shared-key offer for the ClientHello. The binder is written as
/// zeros by the encoder and patched by the handshake once the partial
/// transcript is known.
#[derive(Debug, Clone)]
pub struct PskOffer {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
    pub binder_len: usize,
}

impl PskOffer {
    /// Encoded size including the 4-byte extension header.
    pub fn wire_len(&self) -> usize {
        4 + 2 + (2 + self.identity.len() + 4) + 2 + (1 + self.binder_len)
    }
}

// ---------------------------------------------------------------------------
// Encode: ClientHello
// ---------------------------------------------------------------------------

/// Append the ClientHello extensions block.
///
/// `out` must already hold the message bytes preceding the block: the
/// padding workaround projects the total message length from them. An
/// empty block is discarded entirely rather than encoded as zero-length.
pub fn add_client_hello_extensions(
    hs: &mut HandshakeContext,
    out: &mut ByteBuilder,
    psk: Option<&PskOffer>,
) -> Result<(), Abort> {
    let len_before_extensions = out.len();
    out.open_length_prefixed(2);

    for h in REGISTRY.iter() {
        h.init(hs);
    }
    hs.sent.clear();

    let grease_ext1 = if hs.config.grease_enabled {
        // A fake empty extension before the real list.
        let val = grease_value(hs, GreaseIndex::Extension1);
        out.add_u16(val);
        out.add_u16(0);
        Some(val)
    } else {
        None
    };

    for (i, h) in REGISTRY.iter().enumerate() {
        let len_before = out.len();
        h.add_client_hello(hs, out)?;
        if out.len() != len_before {
            hs.sent.set(i);
        }
    }

    if let Some(ext1) = grease_ext1 {
        // A fake one-byte extension after the real list. The two fake
        // values must differ; GREASE values are of the form 0x?a?a, so
        // XOR produces another valid one.
        let mut ext2 = grease_value(hs, GreaseIndex::Extension2);
        if ext2 == ext1 {
            ext2 ^= 0x1010;
        }
        out.add_u16(ext2);
        out.add_u16(1);
        out.add_u8(0);
    }

    if !hs.config.is_dtls {
        let psk_len = psk.map(|p| p.wire_len()).unwrap_or(0);
        let total = out.len() + psk_len;
        // Pad ClientHello lengths in (0xff, 0x200) up to 0x200 to work
        // around intolerant middleboxes (RFC 7685). The boundary
        // constants are load-bearing; do not generalize them.
        if total > 0xff && total < 0x200 {
            let mut padding_len = 0x200 - total;
            // Extensions take four bytes of header, and the last
            // extension must carry at least one byte of data.
            if padding_len >= 4 + 1 {
                padding_len -= 4;
            } else {
                padding_len = 1;
            }
            out.add_u16(ids::PADDING);
            out.add_u16(padding_len as u16);
            out.add_bytes(&vec![0u8; padding_len]);
        }
    }

    // The PSK extension is always last, after padding: its binder commits
    // to the transcript of everything preceding it.
    if let Some(offer) = psk {
        out.add_u16(ids::PRE_SHARED_KEY);
        out.open_length_prefixed(2);
        out.open_length_prefixed(2);
        out.add_u16(offer.identity.len() as u16);
        out.add_bytes(&offer.identity);
        out.add_u32(offer.obfuscated_ticket_age);
        out.close_length_prefixed()?;
        out.open_length_prefixed(2);
        out.add_u8(offer.binder_len as u8);
        out.add_bytes(&vec![0u8; offer.binder_len]);
        out.close_length_prefixed()?;
        out.close_length_prefixed()?;
    }

    // ClientHello path: always discard an empty extensions block.
    if out.len() == len_before_extensions + 2 {
        out.discard_child();
    } else {
        out.close_length_prefixed()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encode: ServerHello
// ---------------------------------------------------------------------------

/// Append the ServerHello extensions block. Only extensions the peer
/// offered are answered. Pre-TLS-1.3 an empty block is discarded; at 1.3
/// the (conceptually mandatory) block stays even when empty.
pub fn add_server_hello_extensions(
    hs: &mut HandshakeContext,
    out: &mut ByteBuilder,
    version: TlsVersion,
) -> Result<(), Abort> {
    let len_before = out.len();
    out.open_length_prefixed(2);

    for (i, h) in REGISTRY.iter().enumerate() {
        if !hs.received.get(i) {
            // Don't send extensions that were not received.
            continue;
        }
        h.add_server_hello(hs, out)?;
    }

    if out.len() == len_before + 2 && version < TlsVersion::Tls13 {
        out.discard_child();
    } else {
        out.close_length_prefixed()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Duplicate detection
// ---------------------------------------------------------------------------

/// Check an extension block for duplicate type ids.
///
/// Two passes (count, then collect) because the entry count is unknown up
/// front; then sort and compare adjacent values.
pub fn check_duplicate_extensions(block: ByteCursor<'_>) -> Result<(), Abort> {
    let mut count = 0usize;
    let mut pass = block;
    while !pass.is_empty() {
        pass.get_u16()?;
        pass.get_u16_length_prefixed()?;
        count += 1;
    }
    if count == 0 {
        return Ok(());
    }

    let mut types = Vec::with_capacity(count);
    let mut pass = block;
    while !pass.is_empty() {
        types.push(pass.get_u16()?);
        pass.get_u16_length_prefixed()?;
    }

    types.sort_unstable();
    if types.windows(2).any(|w| w[0] == w[1]) {
        return Err(Abort::decode_error("duplicate extension"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decode: ServerHello / EncryptedExtensions (client side)
// ---------------------------------------------------------------------------

/// Dispatch a received server extension block through the registry.
///
/// Any extension we never sent is a protocol violation (except the
/// renegotiation type, which may be signaled via SCSV instead). After the
/// wire-order pass, every handler whose extension was absent runs with
/// `None` contents.
pub fn parse_server_extensions(
    hs: &mut HandshakeContext,
    block: Option<ByteCursor<'_>>,
) -> Result<(), Abort> {
    let mut received = ExtensionBits::new();

    if let Some(block) = block {
        check_duplicate_extensions(block)?;

        let mut cursor = block;
        while !cursor.is_empty() {
            let ext_type = cursor.get_u16()?;
            let contents = cursor.get_u16_length_prefixed()?;

            let (index, handler) = match find(ext_type) {
                Some(found) => found,
                None => {
                    return Err(Abort::unsupported_extension(format!(
                        "unknown extension {ext_type} in server hello"
                    )))
                }
            };

            if !hs.sent.get(index) && ext_type != ids::RENEGOTIATION_INFO {
                return Err(Abort::unsupported_extension(format!(
                    "extension {ext_type} answered but never offered"
                )));
            }

            received.set(index);
            handler.parse_server_hello(hs, Some(contents))?;
        }
    }

    for (i, h) in REGISTRY.iter().enumerate() {
        if !received.get(i) {
            h.parse_server_hello(hs, None)?;
        }
    }

    hs.received = received;
    Ok(())
}

// ---------------------------------------------------------------------------
// Decode: ClientHello (server side)
// ---------------------------------------------------------------------------

/// Dispatch a received ClientHello extension block through the registry.
///
/// Unknown types go to the custom-extension collector. When the legacy
/// SCSV cipher-suite signal stood in for the renegotiation extension, its
/// handler runs with a simulated one-byte presence.
pub fn parse_client_extensions(
    hs: &mut HandshakeContext,
    block: ByteCursor<'_>,
) -> Result<(), Abort> {
    check_duplicate_extensions(block)?;

    for h in REGISTRY.iter() {
        h.init(hs);
    }
    hs.received.clear();
    hs.unknown_extensions.clear();

    let mut cursor = block;
    while !cursor.is_empty() {
        let ext_type = cursor.get_u16()?;
        let contents = cursor.get_u16_length_prefixed()?;

        match find(ext_type) {
            Some((index, handler)) => {
                hs.received.set(index);
                handler.parse_client_hello(hs, Some(contents))?;
            }
            None => {
                hs.unknown_extensions
                    .push((ext_type, contents.remaining().to_vec()));
            }
        }
    }

    // The renegotiation SCSV simulates the extension's presence.
    const FAKE_RENEGOTIATE: [u8; 1] = [0];
    for (i, h) in REGISTRY.iter().enumerate() {
        if hs.received.get(i) {
            continue;
        }
        if h.ext_type() == ids::RENEGOTIATION_INFO && hs.scsv_seen {
            hs.received.set(i);
            h.parse_client_hello(hs, Some(ByteCursor::new(&FAKE_RENEGOTIATE)))?;
        } else {
            h.parse_client_hello(hs, None)?;
        }
    }

    Ok(())
}
