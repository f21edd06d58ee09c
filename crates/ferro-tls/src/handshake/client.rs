//! TLS 1.3 client handshake state machine.
//!
//! A strictly ordered set of states driven by [`ClientHandshake::advance`].
//! Each state reads at most one message or emits part of a flight, then
//! either advances or suspends. Suspensions are explicit: awaiting input,
//! awaiting a flush, or awaiting an asynchronous collaborator; a state
//! re-entered after suspension re-derives rather than re-consumes.

use std::collections::VecDeque;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use ferro_codec::ByteCursor;
use ferro_types::TlsError;

use crate::alert::{Abort, AlertDescription};
use crate::config::TlsConfig;
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::keylog::log_key;
use crate::crypt::provider::{ChannelIdOutcome, KeyExchange, SignOutcome, VerifyOutcome};
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuiteParams, NamedGroup, SignatureScheme};
use crate::extensions::{ids, parse_server_extensions, PskOffer};
use crate::handshake::codec::{
    certificate_verify_content, encode_certificate, encode_certificate_verify,
    encode_client_hello, encode_end_of_early_data, encode_finished,
    parse_certificate, parse_certificate_request, parse_certificate_verify,
    parse_encrypted_extensions_body, parse_finished, parse_server_hello_parts,
    psk_binder_cover, psk_binder_offset, scan_restricted_extensions,
    CLIENT_CERT_VERIFY_CONTEXT, SERVER_CERT_VERIFY_CONTEXT,
};
use crate::handshake::{
    parse_handshake_header, wrap_handshake, HandshakeContext, HandshakeType,
};
use crate::session::{parse_new_session_ticket, session_from_ticket, now_secs, TlsSession};
use crate::{CipherSuite, TlsRole, TlsVersion};

/// Client handshake states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    ReadHelloRetryRequest,
    SendSecondClientHello,
    ReadServerHello,
    ReadEncryptedExtensions,
    ReadCertificateRequest,
    ReadServerCertificate,
    ReadServerCertificateVerify,
    ReadServerFinished,
    SendEndOfEarlyData,
    SendClientCertificate,
    SendClientCertificateVerify,
    CompleteSecondFlight,
    Done,
    Failed,
}

/// What the driver returns to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsStatus {
    /// The handshake is complete.
    Done,
    /// More handshake input is needed; feed a message and re-drive.
    ReadMessage,
    /// Pending output must be flushed before the handshake can proceed.
    Flush,
    /// The server declined 0-RTT; queued early data must be replayed.
    EarlyDataRejected,
    /// An asynchronous certificate operation is pending; re-drive later.
    X509Lookup,
    /// An asynchronous private-key operation is pending; re-drive later.
    PrivateKeyOperation,
    /// The channel-binding key is not yet available; re-drive later.
    ChannelIdLookup,
}

enum StateOutcome {
    Continue,
    Suspend(HsStatus),
}

/// The caller-visible result of a completed handshake.
#[derive(Debug, Clone)]
pub struct HandshakeSummary {
    pub version: TlsVersion,
    pub cipher_suite: CipherSuite,
    pub alpn: Option<Vec<u8>>,
    pub resumed: bool,
    pub sni_acked: bool,
    pub early_data_accepted: bool,
}

/// The TLS 1.3 client handshake.
pub struct ClientHandshake {
    ctx: HandshakeContext,
    state: ClientState,
    started: bool,

    inbound: VecDeque<Vec<u8>>,
    pending_flight: Vec<u8>,

    transcript: TranscriptHash,
    key_schedule: Option<KeySchedule>,
    key_exchange: Option<Box<dyn KeyExchange>>,
    params: Option<CipherSuiteParams>,

    hrr_cipher: Option<CipherSuite>,
    offered_psk: bool,
    early_data_was_offered: bool,
    early_rejection_reported: bool,

    chain_verified: bool,
    cert_request: bool,
    client_cert_sent: bool,
    channel_id_sent: bool,
    server_chain: Vec<Vec<u8>>,
    cert_request_sigalgs: Vec<SignatureScheme>,

    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    client_app_secret: Vec<u8>,
    server_app_secret: Vec<u8>,
    exporter_secret: Vec<u8>,
    resumption_secret: Vec<u8>,
    early_traffic_secret: Option<Vec<u8>>,
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.client_hs_secret.zeroize();
        self.server_hs_secret.zeroize();
        self.client_app_secret.zeroize();
        self.server_app_secret.zeroize();
        self.exporter_secret.zeroize();
        self.resumption_secret.zeroize();
        if let Some(s) = &mut self.early_traffic_secret {
            s.zeroize();
        }
    }
}

impl ClientHandshake {
    /// Create a client handshake. The key-exchange factory and
    /// certificate verifier collaborators are required.
    pub fn new(config: TlsConfig) -> Result<Self, Abort> {
        if config.key_exchange_factory.is_none() {
            return Err(Abort::internal_error("no key exchange factory configured"));
        }
        if config.verifier.is_none() {
            return Err(Abort::internal_error("no certificate verifier configured"));
        }
        if config.max_version < TlsVersion::Tls13 {
            return Err(Abort::new(
                AlertDescription::ProtocolVersion,
                TlsError::UnsupportedVersion,
            ));
        }
        let ctx = HandshakeContext::new(config, TlsRole::Client)?;
        Ok(Self {
            ctx,
            state: ClientState::ReadHelloRetryRequest,
            started: false,
            inbound: VecDeque::new(),
            pending_flight: Vec::new(),
            transcript: TranscriptHash::new(),
            key_schedule: None,
            key_exchange: None,
            params: None,
            hrr_cipher: None,
            offered_psk: false,
            early_data_was_offered: false,
            early_rejection_reported: false,
            chain_verified: false,
            cert_request: false,
            client_cert_sent: false,
            channel_id_sent: false,
            server_chain: Vec::new(),
            cert_request_sigalgs: Vec::new(),
            client_hs_secret: Vec::new(),
            server_hs_secret: Vec::new(),
            client_app_secret: Vec::new(),
            server_app_secret: Vec::new(),
            exporter_secret: Vec::new(),
            resumption_secret: Vec::new(),
            early_traffic_secret: None,
        })
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Build and queue the first ClientHello.
    pub fn start(&mut self) -> Result<(), Abort> {
        if self.started {
            return Err(Abort::internal_error("handshake already started"));
        }
        self.started = true;

        // Compatibility-mode session id: 32 random bytes.
        let mut session_id = vec![0u8; 32];
        getrandom::getrandom(&mut session_id)
            .map_err(|_| Abort::internal_error("random generation failed"))?;
        self.ctx.session_id = session_id;

        if let Some(session) = &self.ctx.config.resumption_session {
            self.ctx.early_data_offered = self.ctx.config.enable_early_data
                && session.max_early_data > 0
                && !session.is_expired(now_secs());
        }
        self.early_data_was_offered = self.ctx.early_data_offered;

        self.create_key_share()?;
        self.build_and_queue_client_hello()?;

        // The early traffic secret covers exactly ClientHello1.
        if self.ctx.early_data_offered {
            let session = self
                .ctx
                .config
                .resumption_session
                .clone()
                .ok_or_else(|| Abort::internal_error("early data without session"))?;
            let params = CipherSuiteParams::from_suite(session.cipher_suite)
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            let ks = KeySchedule::new(&params, Some(&session.psk));
            let th = self.transcript.hash_with_suffix(params.hash, &[]);
            let secret = ks
                .derive_early_traffic_secret(&th)
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            log_key(
                &self.ctx.config,
                "CLIENT_EARLY_TRAFFIC_SECRET",
                &self.ctx.client_random,
                &secret,
            );
            self.early_traffic_secret = Some(secret);
        }
        Ok(())
    }

    /// Queue one complete inbound handshake message.
    pub fn provide_message(&mut self, msg: &[u8]) -> Result<(), Abort> {
        let (_, _, total) = parse_handshake_header(msg)?;
        if total != msg.len() {
            return Err(Abort::decode_error("handshake message must arrive whole"));
        }
        self.inbound.push_back(msg.to_vec());
        Ok(())
    }

    /// Drain the queued outbound flight.
    pub fn take_pending_flight(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending_flight)
    }

    /// Drive the state machine until it completes or suspends.
    pub fn advance(&mut self) -> Result<HsStatus, Abort> {
        if !self.started {
            return Err(Abort::internal_error("advance before start"));
        }
        loop {
            if self.state == ClientState::Done {
                return Ok(HsStatus::Done);
            }
            if self.state == ClientState::Failed {
                return Err(Abort::internal_error("handshake previously failed"));
            }
            let result = match self.state {
                ClientState::ReadHelloRetryRequest => self.do_read_hello_retry_request(),
                ClientState::SendSecondClientHello => self.do_send_second_client_hello(),
                ClientState::ReadServerHello => self.do_read_server_hello(),
                ClientState::ReadEncryptedExtensions => self.do_read_encrypted_extensions(),
                ClientState::ReadCertificateRequest => self.do_read_certificate_request(),
                ClientState::ReadServerCertificate => self.do_read_server_certificate(),
                ClientState::ReadServerCertificateVerify => {
                    self.do_read_server_certificate_verify()
                }
                ClientState::ReadServerFinished => self.do_read_server_finished(),
                ClientState::SendEndOfEarlyData => self.do_send_end_of_early_data(),
                ClientState::SendClientCertificate => self.do_send_client_certificate(),
                ClientState::SendClientCertificateVerify => {
                    self.do_send_client_certificate_verify()
                }
                ClientState::CompleteSecondFlight => self.do_complete_second_flight(),
                ClientState::Done | ClientState::Failed => unreachable!(),
            };
            match result {
                Ok(StateOutcome::Continue) => continue,
                Ok(StateOutcome::Suspend(status)) => return Ok(status),
                Err(abort) => {
                    self.state = ClientState::Failed;
                    return Err(abort);
                }
            }
        }
    }

    /// The completed handshake's negotiation results. `None` until done.
    pub fn summary(&self) -> Option<HandshakeSummary> {
        if self.state != ClientState::Done {
            return None;
        }
        Some(HandshakeSummary {
            version: self.ctx.negotiated_version?,
            cipher_suite: self.params.as_ref()?.suite,
            alpn: self.ctx.alpn_selected.clone(),
            resumed: self.ctx.session_resumed,
            sni_acked: self.ctx.sni_acked,
            early_data_accepted: self.ctx.early_data_accepted,
        })
    }

    pub fn client_handshake_secret(&self) -> &[u8] {
        &self.client_hs_secret
    }

    pub fn server_handshake_secret(&self) -> &[u8] {
        &self.server_hs_secret
    }

    pub fn client_application_secret(&self) -> &[u8] {
        &self.client_app_secret
    }

    pub fn server_application_secret(&self) -> &[u8] {
        &self.server_app_secret
    }

    pub fn early_traffic_secret(&self) -> Option<&[u8]> {
        self.early_traffic_secret.as_deref()
    }

    /// Process a post-handshake NewSessionTicket into a resumable
    /// session.
    pub fn process_new_session_ticket(&mut self, msg: &[u8]) -> Result<TlsSession, Abort> {
        if self.state != ClientState::Done {
            return Err(Abort::unexpected_message(
                "NewSessionTicket before handshake completion",
            ));
        }
        let (ty, body, total) = parse_handshake_header(msg)?;
        if ty != HandshakeType::NewSessionTicket || total != msg.len() {
            return Err(Abort::unexpected_message("expected NewSessionTicket"));
        }
        let nst = parse_new_session_ticket(body, self.ctx.config.enable_early_data)?;
        let suite = self
            .params
            .as_ref()
            .ok_or_else(|| Abort::internal_error("no negotiated suite"))?
            .suite;
        session_from_ticket(
            &nst,
            suite,
            &self.resumption_secret,
            self.ctx.alpn_selected.clone(),
            self.ctx.config.max_ticket_lifetime,
        )
        .map_err(|e| Abort::new(AlertDescription::InternalError, e))
    }

    // -----------------------------------------------------------------------
    // ClientHello construction
    // -----------------------------------------------------------------------

    fn create_key_share(&mut self) -> Result<(), Abort> {
        let group = match self.ctx.retry_group {
            Some(group) => group,
            None => *self
                .ctx
                .config
                .supported_groups
                .first()
                .ok_or_else(|| Abort::handshake_failure("no groups configured"))?,
        };
        let factory = self
            .ctx
            .config
            .key_exchange_factory
            .clone()
            .ok_or_else(|| Abort::internal_error("no key exchange factory"))?;
        let kx = factory
            .create(group)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        self.ctx.key_share_group = Some(group);
        self.ctx.key_share_public = kx.public_bytes().to_vec();
        self.key_exchange = Some(kx);
        Ok(())
    }

    /// Decide whether to offer the configured session as a PSK.
    fn psk_offer(&self) -> Result<Option<(PskOffer, TlsSession)>, Abort> {
        let Some(session) = self.ctx.config.resumption_session.clone() else {
            return Ok(None);
        };
        if session.version != TlsVersion::Tls13 || session.is_expired(now_secs()) {
            return Ok(None);
        }
        let params = CipherSuiteParams::from_suite(session.cipher_suite)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        // After a retry, the PSK stays on offer only if its hash agrees
        // with the cipher the retry committed to.
        if let Some(hrr_cipher) = self.hrr_cipher {
            let hrr_params = CipherSuiteParams::from_suite(hrr_cipher)
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            if hrr_params.hash != params.hash {
                return Ok(None);
            }
        }
        let offer = PskOffer {
            identity: session.ticket.clone(),
            obfuscated_ticket_age: session.obfuscated_ticket_age(now_secs()),
            binder_len: params.hash_len(),
        };
        Ok(Some((offer, session)))
    }

    fn build_and_queue_client_hello(&mut self) -> Result<(), Abort> {
        let offer = self.psk_offer()?;
        let mut msg = encode_client_hello(&mut self.ctx, offer.as_ref().map(|(o, _)| o))?;

        if let Some((offer, session)) = offer {
            self.offered_psk = true;
            let params = CipherSuiteParams::from_suite(session.cipher_suite)
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            let ks = KeySchedule::new(&params, Some(&session.psk));
            let binder_key = ks
                .binder_key()
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            let th = self
                .transcript
                .hash_with_suffix(params.hash, psk_binder_cover(&msg, offer.binder_len));
            let binder = ks.finished_verify_data(&binder_key, &th);
            let offset = psk_binder_offset(&msg, offer.binder_len);
            msg[offset..].copy_from_slice(&binder);
        }

        self.transcript.update(&msg);
        self.pending_flight.extend_from_slice(&msg);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Message queue helpers
    // -----------------------------------------------------------------------

    /// Peek the next inbound message without consuming it.
    fn current_message(&self) -> Option<Vec<u8>> {
        self.inbound.front().cloned()
    }

    fn next_message(&mut self) {
        self.inbound.pop_front();
    }

    // -----------------------------------------------------------------------
    // States
    // -----------------------------------------------------------------------

    fn do_read_hello_retry_request(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::ServerHello {
            // Not a retry marker; ReadServerHello re-reads this message.
            self.state = ClientState::ReadServerHello;
            return Ok(StateOutcome::Continue);
        }
        let parts = parse_server_hello_parts(body)?;
        if !parts.is_hello_retry_request() {
            self.state = ClientState::ReadServerHello;
            return Ok(StateOutcome::Continue);
        }

        // A genuine retry commits to a 1.3 cipher.
        let suite = parts.cipher_suite;
        let params = CipherSuiteParams::from_suite(suite)
            .map_err(|_| Abort::illegal_parameter("retry selected an unknown cipher"))?;

        let found = scan_restricted_extensions(
            parts.extensions,
            &[ids::KEY_SHARE, ids::COOKIE, ids::SUPPORTED_VERSIONS],
        )?;
        let mut have_key_share = false;
        let mut have_cookie = false;
        for (ext_type, contents) in found {
            let mut contents = contents;
            match ext_type {
                ids::SUPPORTED_VERSIONS => {
                    let selected = contents.get_u16()?;
                    if selected != self.ctx.config.variant.tls13_wire() || !contents.is_empty() {
                        return Err(Abort::illegal_parameter(
                            "retry selected an unsupported version",
                        ));
                    }
                }
                ids::COOKIE => {
                    let value = contents.get_u16_length_prefixed()?;
                    if value.is_empty() || !contents.is_empty() {
                        return Err(Abort::decode_error("retry cookie malformed"));
                    }
                    self.ctx.cookie = value.remaining().to_vec();
                    have_cookie = true;
                }
                ids::KEY_SHARE => {
                    let group = NamedGroup(contents.get_u16()?);
                    if !contents.is_empty() {
                        return Err(Abort::decode_error("retry key_share malformed"));
                    }
                    if !self.ctx.config.supported_groups.contains(&group) {
                        return Err(Abort::illegal_parameter(
                            "retry requested an unsupported group",
                        ));
                    }
                    // Requesting the share we already offered is a
                    // violation: the retry must change something.
                    if self.ctx.key_share_group == Some(group) {
                        return Err(Abort::illegal_parameter(
                            "retry requested the group already offered",
                        ));
                    }
                    self.key_exchange = None;
                    self.ctx.retry_group = Some(group);
                    have_key_share = true;
                }
                _ => unreachable!(),
            }
        }
        if !have_cookie && !have_key_share {
            return Err(Abort::illegal_parameter("empty hello retry request"));
        }

        self.transcript.init_hash(params.hash);
        self.transcript.update_for_hello_retry_request();
        self.transcript.update(&msg);
        self.next_message();

        self.hrr_cipher = Some(suite);
        self.state = ClientState::SendSecondClientHello;

        // A retry invalidates any early-data key schedule.
        if self.ctx.early_data_offered {
            self.ctx.early_data_offered = false;
            self.early_traffic_secret = None;
            if !self.early_rejection_reported {
                self.early_rejection_reported = true;
                return Ok(StateOutcome::Suspend(HsStatus::EarlyDataRejected));
            }
        }
        Ok(StateOutcome::Continue)
    }

    fn do_send_second_client_hello(&mut self) -> Result<StateOutcome, Abort> {
        // A cookie-only retry keeps the original share; a group request
        // replaced it.
        if self.key_exchange.is_none() {
            self.create_key_share()?;
        }
        self.build_and_queue_client_hello()?;
        self.state = ClientState::ReadServerHello;
        Ok(StateOutcome::Suspend(HsStatus::Flush))
    }

    fn do_read_server_hello(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::ServerHello {
            return Err(Abort::unexpected_message(format!(
                "expected ServerHello, got {ty:?}"
            )));
        }
        let parts = parse_server_hello_parts(body)?;

        if parts.version != 0x0303 {
            return Err(Abort::decode_error("wrong legacy version in ServerHello"));
        }
        // Forbid a second HelloRetryRequest.
        if parts.is_hello_retry_request() {
            return Err(Abort::unexpected_message("second HelloRetryRequest"));
        }
        if parts.session_id_echo != self.ctx.session_id.as_slice() {
            return Err(Abort::illegal_parameter("session id echo mismatch"));
        }

        let suite = parts.cipher_suite;
        let params = CipherSuiteParams::from_suite(suite)
            .map_err(|_| Abort::illegal_parameter("server selected an unknown cipher"))?;
        if let Some(hrr_cipher) = self.hrr_cipher {
            if suite != hrr_cipher {
                return Err(Abort::illegal_parameter(
                    "cipher differs from HelloRetryRequest",
                ));
            }
        }

        let found = scan_restricted_extensions(
            parts.extensions,
            &[ids::KEY_SHARE, ids::PRE_SHARED_KEY, ids::SUPPORTED_VERSIONS],
        )?;
        let mut key_share: Option<ByteCursor<'_>> = None;
        let mut pre_shared_key: Option<ByteCursor<'_>> = None;
        let mut supported_versions: Option<ByteCursor<'_>> = None;
        for (ext_type, contents) in found {
            match ext_type {
                ids::KEY_SHARE => key_share = Some(contents),
                ids::PRE_SHARED_KEY => pre_shared_key = Some(contents),
                ids::SUPPORTED_VERSIONS => supported_versions = Some(contents),
                _ => unreachable!(),
            }
        }

        let mut versions = supported_versions
            .ok_or_else(|| Abort::missing_extension("ServerHello without supported_versions"))?;
        let selected = versions.get_u16()?;
        if selected != self.ctx.config.variant.tls13_wire() || !versions.is_empty() {
            return Err(Abort::illegal_parameter("unsupported selected version"));
        }
        self.ctx.negotiated_version = Some(TlsVersion::Tls13);

        // Resolve the PSK before the key schedule starts: the early
        // secret folds the PSK first.
        let mut psk_input: Option<Vec<u8>> = None;
        if let Some(mut psk_ext) = pre_shared_key {
            if !self.offered_psk {
                return Err(Abort::unsupported_extension(
                    "pre_shared_key answered but never offered",
                ));
            }
            let selected_identity = psk_ext.get_u16()?;
            if !psk_ext.is_empty() {
                return Err(Abort::decode_error("pre_shared_key: trailing bytes"));
            }
            // A single identity was offered.
            if selected_identity != 0 {
                return Err(Abort::illegal_parameter("unknown PSK identity selected"));
            }
            let session = self
                .ctx
                .config
                .resumption_session
                .clone()
                .ok_or_else(|| Abort::internal_error("offered PSK without session"))?;
            if session.version != TlsVersion::Tls13 {
                return Err(Abort::illegal_parameter(
                    "session protocol version mismatch",
                ));
            }
            let session_params = CipherSuiteParams::from_suite(session.cipher_suite)
                .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
            if session_params.hash != params.hash {
                return Err(Abort::illegal_parameter("session PRF hash mismatch"));
            }
            self.ctx.session_resumed = true;
            psk_input = Some(session.psk.clone());
        }

        // PSK first, then DHE: the key-schedule construction mandates
        // this order.
        let mut ks = KeySchedule::new(&params, psk_input.as_deref());
        if let Some(psk) = &mut psk_input {
            psk.zeroize();
        }

        let mut key_share = key_share
            .ok_or_else(|| Abort::missing_extension("ServerHello without key_share"))?;
        let group = NamedGroup(key_share.get_u16()?);
        let peer_public = key_share.get_u16_length_prefixed()?;
        if !key_share.is_empty() {
            return Err(Abort::decode_error("key_share: trailing bytes"));
        }
        let kx = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| Abort::internal_error("no key exchange state"))?;
        if group != kx.group() {
            return Err(Abort::illegal_parameter("key_share group mismatch"));
        }
        let mut shared = kx
            .finish(peer_public.remaining())
            .map_err(|alert| Abort::new(alert, TlsError::CryptoFailure("ECDH failed".into())))?;
        ks.advance(&shared)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        shared.zeroize();

        self.transcript.init_hash(params.hash);
        self.transcript.update(&msg);

        let th = self.transcript.current_hash();
        let (client_hs, server_hs) = ks
            .derive_handshake_traffic_secrets(&th)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        log_key(
            &self.ctx.config,
            "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
            &self.ctx.client_random,
            &client_hs,
        );
        log_key(
            &self.ctx.config,
            "SERVER_HANDSHAKE_TRAFFIC_SECRET",
            &self.ctx.client_random,
            &server_hs,
        );
        self.client_hs_secret = client_hs;
        self.server_hs_secret = server_hs;
        self.key_schedule = Some(ks);
        self.params = Some(params);

        self.next_message();
        self.state = ClientState::ReadEncryptedExtensions;
        Ok(StateOutcome::Continue)
    }

    fn do_read_encrypted_extensions(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::EncryptedExtensions {
            return Err(Abort::unexpected_message(format!(
                "expected EncryptedExtensions, got {ty:?}"
            )));
        }
        let block = parse_encrypted_extensions_body(body)?;
        parse_server_extensions(&mut self.ctx, Some(block))?;

        // Accepted early data must run under the original session's
        // parameters.
        if self.ctx.early_data_accepted {
            let session = self
                .ctx
                .config
                .resumption_session
                .as_ref()
                .ok_or_else(|| Abort::internal_error("early data without session"))?;
            let suite = self.params.as_ref().map(|p| p.suite);
            if suite != Some(session.cipher_suite) || self.ctx.alpn_selected != session.alpn {
                return Err(Abort::illegal_parameter(
                    "early data parameters changed by server",
                ));
            }
        }

        self.transcript.update(&msg);
        self.next_message();
        self.state = ClientState::ReadCertificateRequest;

        if self.early_data_was_offered
            && !self.ctx.early_data_accepted
            && !self.early_rejection_reported
        {
            self.early_rejection_reported = true;
            return Ok(StateOutcome::Suspend(HsStatus::EarlyDataRejected));
        }
        Ok(StateOutcome::Continue)
    }

    fn do_read_certificate_request(&mut self) -> Result<StateOutcome, Abort> {
        // A server must not request a fresh certificate on resumption.
        if self.ctx.session_resumed {
            self.state = ClientState::ReadServerFinished;
            return Ok(StateOutcome::Continue);
        }
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::CertificateRequest {
            // Optional message; fall through without consuming.
            self.state = ClientState::ReadServerCertificate;
            return Ok(StateOutcome::Continue);
        }
        let req = parse_certificate_request(body)?;
        self.cert_request_sigalgs = req.sigalgs;
        self.cert_request = true;

        self.transcript.update(&msg);
        self.next_message();
        self.state = ClientState::ReadServerCertificate;
        Ok(StateOutcome::Continue)
    }

    fn do_read_server_certificate(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::Certificate {
            return Err(Abort::unexpected_message(format!(
                "expected Certificate, got {ty:?}"
            )));
        }
        let cert_msg = parse_certificate(body)?;
        if cert_msg.chain.is_empty() {
            return Err(Abort::new(
                AlertDescription::CertificateRequired,
                TlsError::CertVerifyFailed("empty certificate list".into()),
            ));
        }
        self.server_chain = cert_msg.chain;

        self.transcript.update(&msg);
        self.next_message();
        self.state = ClientState::ReadServerCertificateVerify;
        Ok(StateOutcome::Continue)
    }

    fn do_read_server_certificate_verify(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };

        // Chain verification first; it may be asynchronous. Nothing has
        // been consumed, so re-entry after the lookup re-derives cleanly.
        if !self.chain_verified {
            let verifier = self
                .ctx
                .config
                .verifier
                .clone()
                .ok_or_else(|| Abort::internal_error("no verifier"))?;
            match verifier.verify_chain(&self.server_chain) {
                VerifyOutcome::Retry => {
                    return Ok(StateOutcome::Suspend(HsStatus::X509Lookup))
                }
                VerifyOutcome::Invalid => {
                    return Err(Abort::new(
                        AlertDescription::BadCertificate,
                        TlsError::CertVerifyFailed("chain verification failed".into()),
                    ))
                }
                VerifyOutcome::Verified => self.chain_verified = true,
            }
        }

        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::CertificateVerify {
            return Err(Abort::unexpected_message(format!(
                "expected CertificateVerify, got {ty:?}"
            )));
        }
        let cv = parse_certificate_verify(body)?;
        if !self.ctx.config.signature_algorithms.contains(&cv.scheme) {
            return Err(Abort::illegal_parameter(
                "server signed with an unoffered algorithm",
            ));
        }

        // The signature covers the transcript before this message.
        let th = self.transcript.current_hash();
        let content = certificate_verify_content(SERVER_CERT_VERIFY_CONTEXT, &th);
        let verifier = self
            .ctx
            .config
            .verifier
            .clone()
            .ok_or_else(|| Abort::internal_error("no verifier"))?;
        let leaf = self
            .server_chain
            .first()
            .ok_or_else(|| Abort::internal_error("no server certificate"))?;
        if !verifier.verify_signature(leaf, cv.scheme, &content, &cv.signature) {
            return Err(Abort::decrypt_error("CertificateVerify signature invalid"));
        }

        self.transcript.update(&msg);
        self.next_message();
        self.state = ClientState::ReadServerFinished;
        Ok(StateOutcome::Continue)
    }

    fn do_read_server_finished(&mut self) -> Result<StateOutcome, Abort> {
        let Some(msg) = self.current_message() else {
            return Ok(StateOutcome::Suspend(HsStatus::ReadMessage));
        };
        let (ty, body, _) = parse_handshake_header(&msg)?;
        if ty != HandshakeType::Finished {
            return Err(Abort::unexpected_message(format!(
                "expected Finished, got {ty:?}"
            )));
        }
        let params = self
            .params
            .clone()
            .ok_or_else(|| Abort::internal_error("no cipher suite params"))?;
        let verify_data = parse_finished(body, params.hash_len())?;

        let ks = self
            .key_schedule
            .as_mut()
            .ok_or_else(|| Abort::internal_error("no key schedule"))?;
        let finished_key = ks.finished_key(&self.server_hs_secret);
        let expected = ks.finished_verify_data(&finished_key, &self.transcript.current_hash());
        if !bool::from(verify_data.ct_eq(&expected)) {
            return Err(Abort::decrypt_error("server Finished verify_data mismatch"));
        }

        self.transcript.update(&msg);

        // Master secret folds zeros; application secrets cover the
        // transcript through the server Finished.
        ks.advance_to_master()
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        let th = self.transcript.current_hash();
        let (client_app, server_app) = ks
            .derive_app_traffic_secrets(&th)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        let exporter = ks
            .derive_exporter_secret(&th)
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;
        log_key(
            &self.ctx.config,
            "CLIENT_TRAFFIC_SECRET_0",
            &self.ctx.client_random,
            &client_app,
        );
        log_key(
            &self.ctx.config,
            "SERVER_TRAFFIC_SECRET_0",
            &self.ctx.client_random,
            &server_app,
        );
        log_key(
            &self.ctx.config,
            "EXPORTER_SECRET",
            &self.ctx.client_random,
            &exporter,
        );
        self.client_app_secret = client_app;
        self.server_app_secret = server_app;
        self.exporter_secret = exporter;

        self.next_message();
        self.state = ClientState::SendEndOfEarlyData;
        Ok(StateOutcome::Continue)
    }

    fn do_send_end_of_early_data(&mut self) -> Result<StateOutcome, Abort> {
        if self.ctx.early_data_accepted {
            let msg = encode_end_of_early_data();
            self.transcript.update(&msg);
            self.pending_flight.extend_from_slice(&msg);
        }
        self.state = ClientState::SendClientCertificate;
        Ok(StateOutcome::Continue)
    }

    fn do_send_client_certificate(&mut self) -> Result<StateOutcome, Abort> {
        if !self.cert_request {
            self.state = ClientState::CompleteSecondFlight;
            return Ok(StateOutcome::Continue);
        }
        // An empty chain declines the request.
        let chain = self.ctx.config.client_certificate_chain.clone();
        let msg = encode_certificate(&chain)?;
        self.transcript.update(&msg);
        self.pending_flight.extend_from_slice(&msg);
        self.client_cert_sent = !chain.is_empty();

        self.state = ClientState::SendClientCertificateVerify;
        Ok(StateOutcome::Continue)
    }

    fn do_send_client_certificate_verify(&mut self) -> Result<StateOutcome, Abort> {
        // No certificate, no CertificateVerify.
        if !self.client_cert_sent {
            self.state = ClientState::CompleteSecondFlight;
            return Ok(StateOutcome::Continue);
        }
        let scheme = self
            .ctx
            .config
            .signature_algorithms
            .iter()
            .copied()
            .find(|s| self.cert_request_sigalgs.contains(s))
            .ok_or_else(|| Abort::handshake_failure("no common signature algorithm"))?;
        let signer = self
            .ctx
            .config
            .signer
            .clone()
            .ok_or_else(|| Abort::internal_error("certificate sent but no signer configured"))?;

        let th = self.transcript.current_hash();
        let content = certificate_verify_content(CLIENT_CERT_VERIFY_CONTEXT, &th);
        match signer.sign(scheme, &content) {
            SignOutcome::Retry => {
                // The backing key operation is still in flight; the
                // driver re-invokes this same state.
                Ok(StateOutcome::Suspend(HsStatus::PrivateKeyOperation))
            }
            SignOutcome::Failure => Err(Abort::internal_error("private key operation failed")),
            SignOutcome::Signature(sig) => {
                let msg = encode_certificate_verify(scheme, &sig)?;
                self.transcript.update(&msg);
                self.pending_flight.extend_from_slice(&msg);
                self.state = ClientState::CompleteSecondFlight;
                Ok(StateOutcome::Continue)
            }
        }
    }

    fn do_complete_second_flight(&mut self) -> Result<StateOutcome, Abort> {
        // Channel-binding assertion, when a binder is configured.
        if !self.channel_id_sent {
            if let Some(binder) = self.ctx.config.channel_binder.clone() {
                match binder.assert(&self.transcript.current_hash()) {
                    ChannelIdOutcome::Pending => {
                        return Ok(StateOutcome::Suspend(HsStatus::ChannelIdLookup))
                    }
                    ChannelIdOutcome::Disabled => {}
                    ChannelIdOutcome::Assertion(body) => {
                        let msg = wrap_handshake(HandshakeType::ChannelId, &body);
                        self.transcript.update(&msg);
                        self.pending_flight.extend_from_slice(&msg);
                    }
                }
            }
            self.channel_id_sent = true;
        }

        let ks = self
            .key_schedule
            .as_ref()
            .ok_or_else(|| Abort::internal_error("no key schedule"))?;
        let finished_key = ks.finished_key(&self.client_hs_secret);
        let verify_data = ks.finished_verify_data(&finished_key, &self.transcript.current_hash());
        let msg = encode_finished(&verify_data);
        self.transcript.update(&msg);
        self.pending_flight.extend_from_slice(&msg);

        // The resumption secret covers the transcript through the client
        // Finished, feeding future tickets.
        self.resumption_secret = ks
            .derive_resumption_secret(&self.transcript.current_hash())
            .map_err(|e| Abort::new(AlertDescription::InternalError, e))?;

        self.state = ClientState::Done;
        Ok(StateOutcome::Suspend(HsStatus::Flush))
    }
}
