#![forbid(unsafe_code)]
#![doc = "Shared types for the ferro TLS engine."]

mod error;

pub use error::{CodecError, TlsError};
