//! TLS 1.3 key schedule (RFC 8446 Section 7.1).
//!
//! The secret chain: Early Secret → Handshake Secret → Master Secret,
//! each stage folding one input. The early secret is extracted from the
//! PSK (or zeros) and the handshake secret from the ECDHE shared secret —
//! PSK first, then DHE. The construction commits to that order; swapping
//! it produces different secrets.

use zeroize::Zeroize;

use ferro_types::TlsError;

use super::hkdf::{derive_secret, hash, hkdf_expand_label, hkdf_extract, hmac_hash};
use super::{CipherSuiteParams, HashAlg};

/// Current stage of the derivation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheduleStage {
    EarlySecret,
    HandshakeSecret,
    MasterSecret,
}

/// TLS 1.3 key schedule state. Secret material is zeroized on drop.
pub struct KeySchedule {
    alg: HashAlg,
    stage: KeyScheduleStage,
    current_secret: Vec<u8>,
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.current_secret.zeroize();
    }
}

impl KeySchedule {
    /// Initialize the schedule with the resumption PSK, or `None` for the
    /// all-zero placeholder of a fresh handshake.
    pub fn new(params: &CipherSuiteParams, psk: Option<&[u8]>) -> Self {
        let alg = params.hash;
        let zero_psk = vec![0u8; alg.output_len()];
        let ikm = psk.unwrap_or(&zero_psk);
        let current_secret = hkdf_extract(alg, &[], ikm);
        Self {
            alg,
            stage: KeyScheduleStage::EarlySecret,
            current_secret,
        }
    }

    pub fn stage(&self) -> KeyScheduleStage {
        self.stage
    }

    pub fn hash_len(&self) -> usize {
        self.alg.output_len()
    }

    /// Advance the chain by one stage, folding `input`:
    /// `HKDF-Extract(Derive-Secret(current, "derived", ""), input)`.
    ///
    /// The first advance folds the ECDHE shared secret (EarlySecret →
    /// HandshakeSecret); the second folds zeros (→ MasterSecret).
    pub fn advance(&mut self, input: &[u8]) -> Result<(), TlsError> {
        let next_stage = match self.stage {
            KeyScheduleStage::EarlySecret => KeyScheduleStage::HandshakeSecret,
            KeyScheduleStage::HandshakeSecret => KeyScheduleStage::MasterSecret,
            KeyScheduleStage::MasterSecret => {
                return Err(TlsError::HandshakeFailed(
                    "key schedule already at master secret".into(),
                ))
            }
        };
        let empty_hash = hash(self.alg, &[]);
        let mut salt = derive_secret(self.alg, &self.current_secret, b"derived", &empty_hash);
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(self.alg, &salt, input);
        salt.zeroize();
        self.stage = next_stage;
        Ok(())
    }

    /// Advance to the master secret by folding a hash-length block of
    /// zeros.
    pub fn advance_to_master(&mut self) -> Result<(), TlsError> {
        let zeros = vec![0u8; self.alg.output_len()];
        self.advance(&zeros)
    }

    fn expect_stage(&self, stage: KeyScheduleStage, what: &str) -> Result<(), TlsError> {
        if self.stage != stage {
            return Err(TlsError::HandshakeFailed(format!("{what}: wrong stage")));
        }
        Ok(())
    }

    /// Derive-Secret against the current chain secret.
    pub fn derive_secret(&self, label: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.alg, &self.current_secret, label, transcript_hash)
    }

    /// Client early traffic secret (`"c e traffic"`, over ClientHello1).
    pub fn derive_early_traffic_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        self.expect_stage(KeyScheduleStage::EarlySecret, "early traffic secret")?;
        Ok(self.derive_secret(b"c e traffic", transcript_hash))
    }

    /// The PSK binder key (`"res binder"`), finished-key expanded.
    pub fn binder_key(&self) -> Result<Vec<u8>, TlsError> {
        self.expect_stage(KeyScheduleStage::EarlySecret, "binder key")?;
        let empty_hash = hash(self.alg, &[]);
        let base = self.derive_secret(b"res binder", &empty_hash);
        Ok(self.finished_key(&base))
    }

    /// Handshake traffic secrets `(client, server)` over
    /// Hash(CH..ServerHello).
    pub fn derive_handshake_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        self.expect_stage(KeyScheduleStage::HandshakeSecret, "handshake secrets")?;
        Ok((
            self.derive_secret(b"c hs traffic", transcript_hash),
            self.derive_secret(b"s hs traffic", transcript_hash),
        ))
    }

    /// Application traffic secrets `(client, server)` over
    /// Hash(CH..server Finished).
    pub fn derive_app_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        self.expect_stage(KeyScheduleStage::MasterSecret, "application secrets")?;
        Ok((
            self.derive_secret(b"c ap traffic", transcript_hash),
            self.derive_secret(b"s ap traffic", transcript_hash),
        ))
    }

    /// Exporter master secret over Hash(CH..server Finished).
    pub fn derive_exporter_secret(&self, transcript_hash: &[u8]) -> Result<Vec<u8>, TlsError> {
        self.expect_stage(KeyScheduleStage::MasterSecret, "exporter secret")?;
        Ok(self.derive_secret(b"exp master", transcript_hash))
    }

    /// Resumption master secret over Hash(CH..client Finished).
    pub fn derive_resumption_secret(&self, transcript_hash: &[u8]) -> Result<Vec<u8>, TlsError> {
        self.expect_stage(KeyScheduleStage::MasterSecret, "resumption secret")?;
        Ok(self.derive_secret(b"res master", transcript_hash))
    }

    /// `finished_key = HKDF-Expand-Label(base, "finished", "", hash_len)`.
    pub fn finished_key(&self, base_secret: &[u8]) -> Vec<u8> {
        hkdf_expand_label(self.alg, base_secret, b"finished", b"", self.alg.output_len())
    }

    /// `verify_data = HMAC(finished_key, transcript_hash)`.
    pub fn finished_verify_data(&self, finished_key: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
        hmac_hash(self.alg, finished_key, transcript_hash)
    }
}

/// Derive a per-ticket resumption PSK from the resumption master secret
/// and the ticket nonce.
pub fn derive_ticket_psk(alg: HashAlg, resumption_secret: &[u8], nonce: &[u8]) -> Vec<u8> {
    hkdf_expand_label(alg, resumption_secret, b"resumption", nonce, alg.output_len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CipherSuite;

    fn params() -> CipherSuiteParams {
        CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap()
    }

    #[test]
    fn test_stage_progression() {
        let mut ks = KeySchedule::new(&params(), None);
        assert_eq!(ks.stage(), KeyScheduleStage::EarlySecret);
        ks.advance(&[0x11; 32]).unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::HandshakeSecret);
        ks.advance_to_master().unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::MasterSecret);
        assert!(ks.advance(&[0; 32]).is_err());
    }

    #[test]
    fn test_wrong_stage_rejected() {
        let ks = KeySchedule::new(&params(), None);
        assert!(ks.derive_handshake_traffic_secrets(&[0; 32]).is_err());
        assert!(ks.derive_app_traffic_secrets(&[0; 32]).is_err());
        assert!(ks.derive_resumption_secret(&[0; 32]).is_err());
    }

    #[test]
    fn test_psk_then_dhe_ordering_is_detectable() {
        // Fold PSK at init and DHE at advance; swapping the inputs must
        // produce different handshake traffic secrets.
        let psk = vec![0xAA; 32];
        let dhe = vec![0xBB; 32];
        let th = vec![0xCC; 32];

        let mut correct = KeySchedule::new(&params(), Some(&psk));
        correct.advance(&dhe).unwrap();
        let (c1, s1) = correct.derive_handshake_traffic_secrets(&th).unwrap();

        let mut swapped = KeySchedule::new(&params(), Some(&dhe));
        swapped.advance(&psk).unwrap();
        let (c2, s2) = swapped.derive_handshake_traffic_secrets(&th).unwrap();

        assert_ne!(c1, c2);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_zero_psk_equals_none() {
        let zeros = vec![0u8; 32];
        let a = KeySchedule::new(&params(), None);
        let b = KeySchedule::new(&params(), Some(&zeros));
        let th = [0u8; 32];
        assert_eq!(
            a.derive_secret(b"c e traffic", &th),
            b.derive_secret(b"c e traffic", &th)
        );
    }

    #[test]
    fn test_client_server_secrets_differ() {
        let mut ks = KeySchedule::new(&params(), None);
        ks.advance(&[0x11; 32]).unwrap();
        let (c, s) = ks.derive_handshake_traffic_secrets(&[0x22; 32]).unwrap();
        assert_ne!(c, s);
        assert_eq!(c.len(), 32);
    }

    #[test]
    fn test_finished_verify_data_deterministic() {
        let mut ks = KeySchedule::new(&params(), None);
        ks.advance(&[0x11; 32]).unwrap();
        let (c, _) = ks.derive_handshake_traffic_secrets(&[0x22; 32]).unwrap();
        let key = ks.finished_key(&c);
        let v1 = ks.finished_verify_data(&key, &[0x33; 32]);
        let v2 = ks.finished_verify_data(&key, &[0x33; 32]);
        assert_eq!(v1, v2);
        let v3 = ks.finished_verify_data(&key, &[0x34; 32]);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_binder_key_only_at_early_stage() {
        let mut ks = KeySchedule::new(&params(), Some(&[0x55; 32]));
        assert!(ks.binder_key().is_ok());
        ks.advance(&[0; 32]).unwrap();
        assert!(ks.binder_key().is_err());
    }

    #[test]
    fn test_ticket_psk_depends_on_nonce() {
        let rs = [0x77u8; 32];
        let a = derive_ticket_psk(HashAlg::Sha256, &rs, &[0, 0]);
        let b = derive_ticket_psk(HashAlg::Sha256, &rs, &[0, 1]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_sha384_suite_lengths() {
        let p = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_256_GCM_SHA384).unwrap();
        let mut ks = KeySchedule::new(&p, None);
        ks.advance(&[0x11; 48]).unwrap();
        let (c, s) = ks.derive_handshake_traffic_secrets(&[0x22; 48]).unwrap();
        assert_eq!(c.len(), 48);
        assert_eq!(s.len(), 48);
    }
}
