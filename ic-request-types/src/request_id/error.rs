//! Error types for request id calculation.
use thiserror::Error;

/// Errors from reading a `RequestId` from a string. This is not the same as
/// deserialization.
#[derive(Error, Debug)]
pub enum RequestIdFromStringError {
    /// The string did not decode to 32 bytes.
    #[error("Invalid request id size: {0} bytes, expected 32.")]
    InvalidSize(usize),

    /// The string was not in a valid hexadecimal format.
    #[error("Error while decoding hex: {0}")]
    FromHexError(hex::FromHexError),
}

/// An error during the calculation of a `RequestId`.
#[derive(Error, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub enum RequestIdError {
    /// The value has no representation in the hashing scheme.
    #[error("Unsupported value for request id hashing: {0}")]
    UnsupportedValue(String),
    /// A map had a key that was not text.
    #[error("Map keys must be text, found {0}")]
    NonTextKey(String),
    /// A request id can only be derived from a map.
    #[error("A request id can only be computed from a map, found {0}")]
    NotAMap(String),
}
