//! HKDF and HKDF-Expand-Label (RFC 8446 Section 7.1).

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use super::HashAlg;

/// HMAC over `data` with `key`.
pub fn hmac_hash(alg: HashAlg, key: &[u8], data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha384 => {
            let mut mac =
                Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Plain hash of `data`.
pub fn hash(alg: HashAlg, data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Sha256 => Sha256::digest(data).to_vec(),
        HashAlg::Sha384 => Sha384::digest(data).to_vec(),
    }
}

/// HKDF-Extract(salt, ikm).
pub fn hkdf_extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    // A zero-length salt means a hash-length block of zeros (RFC 5869).
    let zero_salt = vec![0u8; alg.output_len()];
    let salt = if salt.is_empty() { &zero_salt } else { salt };
    hmac_hash(alg, salt, ikm)
}

/// HKDF-Expand(prk, info, len).
pub fn hkdf_expand(alg: HashAlg, prk: &[u8], info: &[u8], len: usize) -> Vec<u8> {
    let hash_len = alg.output_len();
    let mut out = Vec::with_capacity(len);
    let mut block: Vec<u8> = Vec::new();
    let mut counter = 1u8;
    while out.len() < len {
        let mut data = Vec::with_capacity(block.len() + info.len() + 1);
        data.extend_from_slice(&block);
        data.extend_from_slice(info);
        data.push(counter);
        block = hmac_hash(alg, prk, &data);
        let take = (len - out.len()).min(hash_len);
        out.extend_from_slice(&block[..take]);
        counter += 1;
    }
    out
}

/// HKDF-Expand-Label(secret, label, context, len) with the "tls13 " prefix.
pub fn hkdf_expand_label(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    len: usize,
) -> Vec<u8> {
    let mut info = Vec::with_capacity(2 + 1 + 6 + label.len() + 1 + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hkdf_expand(alg, secret, &info, len)
}

/// Derive-Secret(secret, label, transcript_hash).
pub fn derive_secret(alg: HashAlg, secret: &[u8], label: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.output_len())
}
