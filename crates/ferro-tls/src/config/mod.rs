//! TLS configuration with builder pattern.

use std::fmt;
use std::sync::Arc;

use crate::crypt::provider::{
    CertificateVerifier, ChannelBinder, KeyExchangeFactory, PrivateKeySigner,
};
use crate::crypt::{NamedGroup, SignatureScheme};
use crate::session::TlsSession;
use crate::{CipherSuite, TlsVariant, TlsVersion};

/// Callback receiving NSS key-log lines.
pub type KeyLogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// TLS configuration.
#[derive(Clone)]
pub struct TlsConfig {
    /// Minimum supported TLS version.
    pub min_version: TlsVersion,
    /// Maximum supported TLS version.
    pub max_version: TlsVersion,
    /// TLS 1.3 signaling variant.
    pub variant: TlsVariant,
    /// Enabled cipher suites (in preference order).
    pub cipher_suites: Vec<CipherSuite>,
    /// Supported named groups for key exchange (in preference order).
    pub supported_groups: Vec<NamedGroup>,
    /// Supported signature algorithms (in preference order).
    pub signature_algorithms: Vec<SignatureScheme>,
    /// Server name for the SNI extension.
    pub server_name: Option<String>,
    /// ALPN protocols (in preference order).
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Inject GREASE values into extensions, groups, and versions.
    pub grease_enabled: bool,
    /// DTLS transport. Suppresses the ClientHello padding workaround.
    pub is_dtls: bool,
    /// Offer 0-RTT when the resumption ticket permits it.
    pub enable_early_data: bool,
    /// Session to resume via PSK.
    pub resumption_session: Option<TlsSession>,
    /// Upper bound on stored ticket lifetimes, in seconds.
    pub max_ticket_lifetime: u32,
    /// Key exchange factory (required to start a handshake).
    pub key_exchange_factory: Option<Arc<dyn KeyExchangeFactory>>,
    /// Client private key for CertificateVerify signing.
    pub signer: Option<Arc<dyn PrivateKeySigner>>,
    /// Peer certificate verifier (required to start a handshake).
    pub verifier: Option<Arc<dyn CertificateVerifier>>,
    /// Optional channel-binding assertion source.
    pub channel_binder: Option<Arc<dyn ChannelBinder>>,
    /// Client certificate chain (DER-encoded, leaf first).
    pub client_certificate_chain: Vec<Vec<u8>>,
    /// NSS key-log callback.
    pub key_log_callback: Option<KeyLogCallback>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("variant", &self.variant)
            .field("cipher_suites", &self.cipher_suites)
            .field("supported_groups", &self.supported_groups)
            .field("server_name", &self.server_name)
            .field("grease_enabled", &self.grease_enabled)
            .field("enable_early_data", &self.enable_early_data)
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Create a builder for TLS configuration.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }
}

/// Builder for [`TlsConfig`].
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            config: TlsConfig {
                min_version: TlsVersion::Tls12,
                max_version: TlsVersion::Tls13,
                variant: TlsVariant::Rfc8446,
                cipher_suites: vec![
                    CipherSuite::TLS_AES_128_GCM_SHA256,
                    CipherSuite::TLS_AES_256_GCM_SHA384,
                    CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
                ],
                supported_groups: vec![NamedGroup::X25519, NamedGroup::SECP256R1],
                signature_algorithms: vec![
                    SignatureScheme::ECDSA_SECP256R1_SHA256,
                    SignatureScheme::RSA_PSS_RSAE_SHA256,
                    SignatureScheme::RSA_PKCS1_SHA256,
                    SignatureScheme::ED25519,
                ],
                server_name: None,
                alpn_protocols: Vec::new(),
                grease_enabled: false,
                is_dtls: false,
                enable_early_data: false,
                resumption_session: None,
                // Seven days, the RFC 8446 ticket_lifetime ceiling.
                max_ticket_lifetime: 604_800,
                key_exchange_factory: None,
                signer: None,
                verifier: None,
                channel_binder: None,
                client_certificate_chain: Vec::new(),
                key_log_callback: None,
            },
        }
    }
}

impl TlsConfigBuilder {
    pub fn min_version(mut self, v: TlsVersion) -> Self {
        self.config.min_version = v;
        self
    }

    pub fn max_version(mut self, v: TlsVersion) -> Self {
        self.config.max_version = v;
        self
    }

    pub fn variant(mut self, v: TlsVariant) -> Self {
        self.config.variant = v;
        self
    }

    pub fn cipher_suites(mut self, suites: Vec<CipherSuite>) -> Self {
        self.config.cipher_suites = suites;
        self
    }

    pub fn supported_groups(mut self, groups: Vec<NamedGroup>) -> Self {
        self.config.supported_groups = groups;
        self
    }

    pub fn signature_algorithms(mut self, schemes: Vec<SignatureScheme>) -> Self {
        self.config.signature_algorithms = schemes;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    pub fn alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.config.alpn_protocols = protocols;
        self
    }

    pub fn grease(mut self, enabled: bool) -> Self {
        self.config.grease_enabled = enabled;
        self
    }

    pub fn dtls(mut self, is_dtls: bool) -> Self {
        self.config.is_dtls = is_dtls;
        self
    }

    pub fn early_data(mut self, enabled: bool) -> Self {
        self.config.enable_early_data = enabled;
        self
    }

    pub fn resumption_session(mut self, session: TlsSession) -> Self {
        self.config.resumption_session = Some(session);
        self
    }

    pub fn max_ticket_lifetime(mut self, seconds: u32) -> Self {
        self.config.max_ticket_lifetime = seconds;
        self
    }

    pub fn key_exchange_factory(mut self, f: Arc<dyn KeyExchangeFactory>) -> Self {
        self.config.key_exchange_factory = Some(f);
        self
    }

    pub fn signer(mut self, s: Arc<dyn PrivateKeySigner>) -> Self {
        self.config.signer = Some(s);
        self
    }

    pub fn verifier(mut self, v: Arc<dyn CertificateVerifier>) -> Self {
        self.config.verifier = Some(v);
        self
    }

    pub fn channel_binder(mut self, b: Arc<dyn ChannelBinder>) -> Self {
        self.config.channel_binder = Some(b);
        self
    }

    pub fn client_certificate_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.config.client_certificate_chain = chain;
        self
    }

    pub fn key_log(mut self, cb: KeyLogCallback) -> Self {
        self.config.key_log_callback = Some(cb);
        self
    }

    pub fn build(self) -> TlsConfig {
        self.config
    }
}
