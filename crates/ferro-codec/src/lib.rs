#![forbid(unsafe_code)]
#![doc = "Wire codec primitives: a bounds-checked read cursor and a length-patching builder."]

pub mod asn1;
mod builder;
mod cursor;

pub use builder::ByteBuilder;
pub use cursor::ByteCursor;
