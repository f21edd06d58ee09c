//! Running transcript hash over handshake messages.
//!
//! Messages are buffered until the cipher suite's hash is known (the
//! ClientHello is sent before any negotiation), then fed into a live
//! digest. Hashing order is wire order and is security-critical: every
//! Finished and PSK-binder proof commits to it.

use sha2::{Digest, Sha256, Sha384};

use super::HashAlg;

#[derive(Clone)]
enum Inner {
    /// Raw message bytes retained until the hash is chosen.
    Buffering(Vec<u8>),
    Sha256(Sha256),
    Sha384(Sha384),
}

/// The running handshake transcript.
#[derive(Clone)]
pub struct TranscriptHash {
    inner: Inner,
    alg: Option<HashAlg>,
}

impl Default for TranscriptHash {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptHash {
    pub fn new() -> Self {
        Self {
            inner: Inner::Buffering(Vec::new()),
            alg: None,
        }
    }

    /// The selected hash algorithm, if negotiation has fixed one.
    pub fn alg(&self) -> Option<HashAlg> {
        self.alg
    }

    /// Fix the hash algorithm, replaying any buffered messages.
    /// A second call with the same algorithm is a no-op.
    pub fn init_hash(&mut self, alg: HashAlg) {
        if self.alg == Some(alg) {
            return;
        }
        debug_assert!(self.alg.is_none(), "transcript hash re-initialized");
        let buffered = match &self.inner {
            Inner::Buffering(buf) => buf.clone(),
            _ => Vec::new(),
        };
        self.inner = fresh_digest(alg, &buffered);
        self.alg = Some(alg);
    }

    /// Fold a complete handshake message (header included).
    pub fn update(&mut self, msg: &[u8]) {
        match &mut self.inner {
            Inner::Buffering(buf) => buf.extend_from_slice(msg),
            Inner::Sha256(d) => d.update(msg),
            Inner::Sha384(d) => d.update(msg),
        }
    }

    /// Replace the accumulated first ClientHello with its message_hash
    /// wrapper, as a HelloRetryRequest requires (RFC 8446 Section 4.4.1):
    /// `message_hash(0xFE) || 00 00 || hash_len || Hash(ClientHello1)`.
    ///
    /// Must be called after `init_hash`, before the HRR itself is folded.
    pub fn update_for_hello_retry_request(&mut self) {
        let alg = self.alg.expect("init_hash before HRR rewrap");
        let ch1_hash = self.current_hash();
        let mut wrapper = Vec::with_capacity(4 + ch1_hash.len());
        wrapper.push(254); // message_hash
        wrapper.extend_from_slice(&[0, 0]);
        wrapper.push(ch1_hash.len() as u8);
        wrapper.extend_from_slice(&ch1_hash);
        self.inner = fresh_digest(alg, &wrapper);
    }

    /// The transcript hash over everything folded so far.
    ///
    /// Panics if the hash algorithm has not been fixed yet; use
    /// [`TranscriptHash::hash_with_suffix`] before negotiation.
    pub fn current_hash(&self) -> Vec<u8> {
        match &self.inner {
            Inner::Buffering(_) => panic!("transcript hash requested before init_hash"),
            Inner::Sha256(d) => d.clone().finalize().to_vec(),
            Inner::Sha384(d) => d.clone().finalize().to_vec(),
        }
    }

    /// Hash of the transcript so far plus `suffix`, under `alg`, without
    /// mutating the transcript. Used for PSK binders, which commit to a
    /// partial ClientHello before the transcript's own hash is fixed.
    pub fn hash_with_suffix(&self, alg: HashAlg, suffix: &[u8]) -> Vec<u8> {
        match &self.inner {
            Inner::Buffering(buf) => {
                let mut joined = buf.clone();
                joined.extend_from_slice(suffix);
                super::hkdf::hash(alg, &joined)
            }
            Inner::Sha256(d) => {
                debug_assert_eq!(self.alg, Some(alg));
                let mut d = d.clone();
                d.update(suffix);
                d.finalize().to_vec()
            }
            Inner::Sha384(d) => {
                debug_assert_eq!(self.alg, Some(alg));
                let mut d = d.clone();
                d.update(suffix);
                d.finalize().to_vec()
            }
        }
    }
}

fn fresh_digest(alg: HashAlg, initial: &[u8]) -> Inner {
    match alg {
        HashAlg::Sha256 => {
            let mut d = Sha256::new();
            d.update(initial);
            Inner::Sha256(d)
        }
        HashAlg::Sha384 => {
            let mut d = Sha384::new();
            d.update(initial);
            Inner::Sha384(d)
        }
    }
}
