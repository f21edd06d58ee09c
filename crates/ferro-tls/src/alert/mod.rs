//! TLS alert protocol.

use ferro_types::{CodecError, TlsError};

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes (RFC 8446 Section 6, plus legacy codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    /// Convert from a wire byte.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        use AlertDescription::*;
        Ok(match v {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            22 => RecordOverflow,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            86 => InappropriateFallback,
            90 => UserCanceled,
            109 => MissingExtension,
            110 => UnsupportedExtension,
            112 => UnrecognizedName,
            113 => BadCertificateStatusResponse,
            115 => UnknownPskIdentity,
            116 => CertificateRequired,
            120 => NoApplicationProtocol,
            _ => return Err(v),
        })
    }
}

/// A TLS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    /// A fatal alert with the given description.
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// Encode to the 2-byte wire form.
    pub fn to_wire(self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }
}

/// A fatal handshake failure: the alert to send on the wire before
/// teardown, plus the underlying error for the caller.
#[derive(Debug)]
pub struct Abort {
    pub alert: AlertDescription,
    pub error: TlsError,
}

impl Abort {
    pub fn new(alert: AlertDescription, error: TlsError) -> Self {
        Self { alert, error }
    }

    pub fn decode_error(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::DecodeError,
            TlsError::HandshakeFailed(reason.into()),
        )
    }

    pub fn illegal_parameter(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::IllegalParameter,
            TlsError::ProtocolViolation(reason.into()),
        )
    }

    pub fn unexpected_message(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::UnexpectedMessage,
            TlsError::ProtocolViolation(reason.into()),
        )
    }

    pub fn unsupported_extension(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::UnsupportedExtension,
            TlsError::ProtocolViolation(reason.into()),
        )
    }

    pub fn missing_extension(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::MissingExtension,
            TlsError::ProtocolViolation(reason.into()),
        )
    }

    pub fn handshake_failure(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::HandshakeFailure,
            TlsError::HandshakeFailed(reason.into()),
        )
    }

    pub fn decrypt_error(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::DecryptError,
            TlsError::CryptoFailure(reason.into()),
        )
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(
            AlertDescription::InternalError,
            TlsError::HandshakeFailed(reason.into()),
        )
    }
}

impl From<CodecError> for Abort {
    fn from(e: CodecError) -> Self {
        // Wire-level failures map to decode_error unless a callback set a
        // more specific alert.
        Self::new(AlertDescription::DecodeError, TlsError::Codec(e))
    }
}

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (alert: {:?})", self.error, self.alert)
    }
}

impl std::error::Error for Abort {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_wire_encoding() {
        let alert = Alert::fatal(AlertDescription::DecodeError);
        assert_eq!(alert.to_wire(), [2, 50]);
    }

    #[test]
    fn test_description_roundtrip() {
        let codes: &[u8] = &[
            0, 10, 20, 22, 40, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 70, 71, 80, 86, 90, 109,
            110, 112, 113, 115, 116, 120,
        ];
        for &code in codes {
            let desc = AlertDescription::from_u8(code).unwrap();
            assert_eq!(desc as u8, code);
        }
        assert!(AlertDescription::from_u8(200).is_err());
    }

    #[test]
    fn test_abort_from_codec_error() {
        let abort: Abort = CodecError::Truncated.into();
        assert_eq!(abort.alert, AlertDescription::DecodeError);
    }

    #[test]
    fn test_abort_helpers_pick_alert() {
        assert_eq!(
            Abort::illegal_parameter("x").alert,
            AlertDescription::IllegalParameter
        );
        assert_eq!(
            Abort::missing_extension("x").alert,
            AlertDescription::MissingExtension
        );
        assert_eq!(
            Abort::decrypt_error("x").alert,
            AlertDescription::DecryptError
        );
    }
}
