use thiserror::Error;

/// Errors raised while checking a [`Certificate`](crate::Certificate).
///
/// A certificate whose signature simply does not match is not an error: verification
/// returns `Ok(false)` for it. These are the cases where the certificate or the key
/// material cannot be interpreted at all, or where the signer had no authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// The certificate bytes could not be decoded.
    #[error("Failed to decode certificate: {0}")]
    Decode(String),

    /// The delegation certificate itself carried a delegation.
    #[error("Certificate has too many delegations")]
    TooManyDelegations,

    /// The delegation certificate does not contain the subnet public key.
    #[error("The delegation certificate does not contain a public key for subnet {0}")]
    MissingSubnetKey(String),

    /// The delegation certificate does not contain the subnet canister ranges.
    #[error("The delegation certificate does not contain canister ranges for subnet {0}")]
    MissingCanisterRanges(String),

    /// The canister ranges could not be decoded.
    #[error("The canister ranges of subnet {subnet_id} are malformed: {reason}")]
    MalformedCanisterRanges {
        /// The subnet whose ranges were decoded.
        subnet_id: String,
        /// The decoder error.
        reason: String,
    },

    /// The subnet which signed the certificate is not responsible for the canister.
    #[error("Certificate is not authorized to respond to queries for canister {0}")]
    NotAuthorized(String),

    /// The public key had an unexpected length.
    #[error("BLS DER-encoded public key must be {expected} bytes long, but is {actual} bytes long.")]
    DerKeyLengthMismatch {
        /// The expected length of the key.
        expected: usize,
        /// The actual length of the key.
        actual: usize,
    },

    /// The public key did not start with the BLS DER prefix.
    #[error("BLS DER-encoded public key is invalid. Expected the following prefix: {expected:?}, but got {actual:?}")]
    DerPrefixMismatch {
        /// The expected key prefix.
        expected: Vec<u8>,
        /// The actual key prefix.
        actual: Vec<u8>,
    },
}
