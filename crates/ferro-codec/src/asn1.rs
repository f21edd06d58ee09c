//! ASN.1 tag/length parsing layered on [`ByteCursor`].
//!
//! Used for the certificate and signature material that crosses the
//! handshake: DER canonical encoding by default, with a BER-compatible
//! mode that tolerates constructed indefinite-length elements.

use ferro_types::CodecError;

use crate::ByteCursor;

/// Tag class/constructed bits (ITU-T X.690 section 8.1.2).
pub const ASN1_CONSTRUCTED: u8 = 0x20;
pub const ASN1_CONTEXT_SPECIFIC: u8 = 0x80;

pub const ASN1_BOOLEAN: u8 = 0x01;
pub const ASN1_INTEGER: u8 = 0x02;
pub const ASN1_BITSTRING: u8 = 0x03;
pub const ASN1_OCTETSTRING: u8 = 0x04;
pub const ASN1_OBJECT: u8 = 0x06;
pub const ASN1_SEQUENCE: u8 = 0x10 | ASN1_CONSTRUCTED;
pub const ASN1_SET: u8 = 0x11 | ASN1_CONSTRUCTED;

/// Parse any ASN.1 element, returning `(tag, element, header_len)` where
/// `element` spans the full TLV including the header.
///
/// DER rules: single-byte tags only (a 0x1f low-tag-number pattern means a
/// multi-byte tag and is rejected); short-form lengths below 0x80;
/// long-form lengths with 1–4 length octets, minimally encoded. The
/// reserved first length octet 0xFF parses as 127 octets and fails the
/// octet-count check.
pub fn get_any_asn1_element<'a>(
    cbs: &mut ByteCursor<'a>,
) -> Result<(u8, ByteCursor<'a>, usize), CodecError> {
    asn1_element(cbs, false)
}

/// BER-compatible variant: a constructed, indefinite-length element is
/// returned as its 2-byte header with the body unresolved, for the caller
/// to re-scan.
pub fn get_any_ber_asn1_element<'a>(
    cbs: &mut ByteCursor<'a>,
) -> Result<(u8, ByteCursor<'a>, usize), CodecError> {
    asn1_element(cbs, true)
}

fn asn1_element<'a>(
    cbs: &mut ByteCursor<'a>,
    ber_ok: bool,
) -> Result<(u8, ByteCursor<'a>, usize), CodecError> {
    let saved = *cbs;
    match asn1_element_inner(cbs, ber_ok) {
        Ok(out) => Ok(out),
        Err(e) => {
            *cbs = saved;
            Err(e)
        }
    }
}

fn asn1_element_inner<'a>(
    cbs: &mut ByteCursor<'a>,
    ber_ok: bool,
) -> Result<(u8, ByteCursor<'a>, usize), CodecError> {
    let mut header = *cbs;
    let tag = header.get_u8()?;
    let length_byte = header.get_u8()?;

    // Multi-byte tag numbers are not supported.
    if tag & 0x1f == 0x1f {
        return Err(CodecError::MalformedEncoding);
    }

    let (total_len, header_len);
    if length_byte & 0x80 == 0 {
        // Short form.
        total_len = length_byte as usize + 2;
        header_len = 2;
    } else {
        let num_bytes = (length_byte & 0x7f) as usize;

        if ber_ok && tag & ASN1_CONSTRUCTED != 0 && num_bytes == 0 {
            // Indefinite length: hand back the bare header.
            let element = cbs.get_bytes(2)?;
            return Ok((tag, element, 2));
        }

        // 0xFF as the first length octet is reserved; it parses as 127
        // octets and fails here along with every other count outside 1..=4.
        if num_bytes == 0 || num_bytes > 4 {
            return Err(CodecError::MalformedEncoding);
        }
        let mut len: u32 = 0;
        for _ in 0..num_bytes {
            len = (len << 8) | u32::from(header.get_u8()?);
        }
        // DER requires the minimal length encoding.
        if len < 128 {
            return Err(CodecError::MalformedEncoding);
        }
        if len >> ((num_bytes - 1) * 8) == 0 {
            return Err(CodecError::MalformedEncoding);
        }
        total_len = len as usize + 2 + num_bytes;
        header_len = 2 + num_bytes;
    }

    let element = cbs.get_bytes(total_len)?;
    Ok((tag, element, header_len))
}

/// Parse an element with the expected tag, returning its contents (header
/// skipped).
pub fn get_asn1<'a>(cbs: &mut ByteCursor<'a>, tag_value: u8) -> Result<ByteCursor<'a>, CodecError> {
    let saved = *cbs;
    let (tag, mut element, header_len) = get_any_asn1_element(cbs)?;
    if tag != tag_value {
        *cbs = saved;
        return Err(CodecError::MalformedEncoding);
    }
    element.skip(header_len)?;
    Ok(element)
}

/// Parse an element with the expected tag, returning the full TLV.
pub fn get_asn1_element<'a>(
    cbs: &mut ByteCursor<'a>,
    tag_value: u8,
) -> Result<ByteCursor<'a>, CodecError> {
    let saved = *cbs;
    let (tag, element, _) = get_any_asn1_element(cbs)?;
    if tag != tag_value {
        *cbs = saved;
        return Err(CodecError::MalformedEncoding);
    }
    Ok(element)
}

/// True if the next byte is exactly `tag_value`. Consumes nothing.
pub fn peek_asn1_tag(cbs: &ByteCursor<'_>, tag_value: u8) -> bool {
    cbs.peek_tag(tag_value)
}
