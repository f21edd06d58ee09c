//! NSS Key Log Format support (SSLKEYLOGFILE).
//!
//! Wireshark-compatible key logging for TLS debugging.
//! Format: `<label> <client_random_hex> <secret_hex>`
//!
//! Labels: CLIENT_EARLY_TRAFFIC_SECRET, CLIENT_HANDSHAKE_TRAFFIC_SECRET,
//! SERVER_HANDSHAKE_TRAFFIC_SECRET, CLIENT_TRAFFIC_SECRET_0,
//! SERVER_TRAFFIC_SECRET_0, EXPORTER_SECRET

use crate::config::TlsConfig;

/// Convert bytes to lowercase hex string.
fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Log a key material line in NSS key log format.
///
/// Calls the `key_log_callback` on `config` (if set) with a line:
/// `<label> <client_random_hex> <secret_hex>`
pub fn log_key(config: &TlsConfig, label: &str, client_random: &[u8; 32], secret: &[u8]) {
    if let Some(cb) = &config.key_log_callback {
        let line = format!("{} {} {}", label, to_hex(client_random), to_hex(secret));
        cb(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x01, 0xab, 0xff]), "01abff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_log_key_no_callback() {
        let config = TlsConfig::builder().build();
        // Should not panic
        log_key(&config, "CLIENT_RANDOM", &[0u8; 32], &[1, 2, 3]);
    }

    #[test]
    fn test_log_key_with_callback() {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let lines_clone = lines.clone();
        let config = TlsConfig::builder()
            .key_log(Arc::new(move |line: &str| {
                lines_clone.lock().unwrap().push(line.to_string());
            }))
            .build();
        log_key(
            &config,
            "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
            &[0xAB; 32],
            &[0x01, 0x02],
        );
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("CLIENT_HANDSHAKE_TRAFFIC_SECRET "));
        assert!(lines[0].ends_with(" 0102"));
    }
}
