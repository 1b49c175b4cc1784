//! Certificates and their verification.
//!
//! cf <https://internetcomputer.org/docs/current/references/ic-interface-spec/#certificate>

use crate::{error::CertificateError, hash_tree::HashTree};
use candid::Principal;
use rangemap::{RangeInclusiveSet, StepFns};
use serde::{Deserialize, Serialize};

const IC_STATE_ROOT_DOMAIN_SEPARATOR: &[u8; 14] = b"\x0Dic-state-root";

const DER_PREFIX: &[u8; 37] = b"\x30\x81\x82\x30\x1d\x06\x0d\x2b\x06\x01\x04\x01\x82\xdc\x7c\x05\x03\x01\x02\x01\x06\x0c\x2b\x06\x01\x04\x01\x82\xdc\x7c\x05\x03\x02\x01\x03\x61\x00";
const KEY_LENGTH: usize = 96;

/// A certificate: a hash tree plus a signature over its root, possibly made by a subnet
/// that the root key delegated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// The hash tree.
    pub tree: HashTree,

    /// The signature of the root hash in `tree`.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,

    /// A delegation from the root key to the key used to sign `signature`, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
}

/// A delegation from the root key to a subnet key.
///
/// cf <https://internetcomputer.org/docs/current/references/ic-interface-spec/#certification-delegation>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// The subnet the root key delegates to.
    #[serde(with = "serde_bytes")]
    pub subnet_id: Vec<u8>,

    /// The CBOR-encoded certificate, signed by the root key, holding the subnet's key
    /// and canister ranges.
    #[serde(with = "serde_bytes")]
    pub certificate: Vec<u8>,
}

/// Checks a BLS signature over a message.
pub trait SignatureVerifier: Send + Sync {
    /// Returns whether `signature` is a valid signature of `message` by the raw 96-byte
    /// `public_key`.
    fn verify(&self, signature: &[u8], message: &[u8], public_key: &[u8]) -> bool;
}

/// The production [`SignatureVerifier`], backed by `ic-verify-bls-signature`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlsVerifier;

impl SignatureVerifier for BlsVerifier {
    fn verify(&self, signature: &[u8], message: &[u8], public_key: &[u8]) -> bool {
        ic_verify_bls_signature::verify_bls_signature(signature, message, public_key).is_ok()
    }
}

/// Inclusive canister id ranges assigned to a subnet.
pub type CanisterRanges = RangeInclusiveSet<Principal, PrincipalStep>;

/// Steps a principal to its neighbours of the same length, reading its bytes as a
/// big-endian number. Lets [`CanisterRanges`] merge adjacent ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrincipalStep;

impl StepFns<Principal> for PrincipalStep {
    fn add_one(start: &Principal) -> Principal {
        let mut bytes = start.as_slice().to_vec();
        for byte in bytes.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
        Principal::from_slice(&bytes)
    }

    fn sub_one(start: &Principal) -> Principal {
        let mut bytes = start.as_slice().to_vec();
        for byte in bytes.iter_mut().rev() {
            *byte = byte.wrapping_sub(1);
            if *byte != u8::MAX {
                break;
            }
        }
        Principal::from_slice(&bytes)
    }
}

/// Collects `(low, high)` pairs, as they are encoded in certificates, into a range set.
pub fn canister_range_set<I>(ranges: I) -> CanisterRanges
where
    I: IntoIterator<Item = (Principal, Principal)>,
{
    let mut set = CanisterRanges::new_with_step_fns();
    for (low, high) in ranges {
        if low <= high {
            set.insert(low..=high);
        }
    }
    set
}

impl Certificate {
    /// Decodes a CBOR certificate, with or without the self-describe tag.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CertificateError> {
        serde_cbor::from_slice(bytes).map_err(|e| CertificateError::Decode(e.to_string()))
    }

    /// The reconstructed root digest of the tree.
    pub fn root_hash(&self) -> [u8; 32] {
        self.tree.digest()
    }

    /// The message the signature is made over.
    pub fn signable(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(IC_STATE_ROOT_DOMAIN_SEPARATOR.len() + 32);
        msg.extend_from_slice(IC_STATE_ROOT_DOMAIN_SEPARATOR);
        msg.extend_from_slice(&self.root_hash());
        msg
    }

    /// Verifies the certificate for a response about `canister_id`.
    ///
    /// `root_key` is the DER-encoded root public key. When the certificate is delegated,
    /// the delegation certificate is verified against the root key first, and the
    /// delegated subnet must be responsible for `canister_id`.
    ///
    /// Returns `Ok(false)` if a signature does not match.
    pub fn verify(
        &self,
        canister_id: Principal,
        root_key: &[u8],
        verifier: &dyn SignatureVerifier,
    ) -> Result<bool, CertificateError> {
        let der_key = match &self.delegation {
            None => root_key.to_vec(),
            Some(delegation) => match delegation.verify(canister_id, root_key, verifier)? {
                Some(key) => key,
                None => return Ok(false),
            },
        };
        let key = extract_der(&der_key)?;
        Ok(verifier.verify(&self.signature, &self.signable(), &key))
    }
}

impl Delegation {
    /// The delegated subnet's id.
    pub fn subnet_principal(&self) -> Principal {
        Principal::from_slice(&self.subnet_id)
    }

    /// Decodes the delegation certificate.
    pub fn certificate(&self) -> Result<Certificate, CertificateError> {
        Certificate::from_cbor(&self.certificate)
    }

    /// The canister ranges the delegated subnet is responsible for.
    pub fn canister_ranges(&self) -> Result<CanisterRanges, CertificateError> {
        let cert = self.certificate()?;
        canister_ranges(&cert, &self.subnet_id)
    }

    /// Verifies the delegation certificate against the root key and returns the
    /// DER-encoded subnet key, or `None` if its signature does not match.
    fn verify(
        &self,
        canister_id: Principal,
        root_key: &[u8],
        verifier: &dyn SignatureVerifier,
    ) -> Result<Option<Vec<u8>>, CertificateError> {
        let cert = self.certificate()?;
        if cert.delegation.is_some() {
            return Err(CertificateError::TooManyDelegations);
        }
        if !cert.verify(canister_id, root_key, verifier)? {
            return Ok(None);
        }

        let subnet = self.subnet_principal();
        if !canister_ranges(&cert, &self.subnet_id)?.contains(&canister_id) {
            return Err(CertificateError::NotAuthorized(canister_id.to_text()));
        }

        let public_key_path: [&[u8]; 3] = [b"subnet", &self.subnet_id, b"public_key"];
        cert.tree
            .lookup_path(public_key_path)
            .map(|key| Some(key.to_vec()))
            .ok_or_else(|| CertificateError::MissingSubnetKey(subnet.to_text()))
    }
}

fn canister_ranges(
    cert: &Certificate,
    subnet_id: &[u8],
) -> Result<CanisterRanges, CertificateError> {
    let subnet = Principal::from_slice(subnet_id).to_text();
    let path: [&[u8]; 3] = [b"subnet", subnet_id, b"canister_ranges"];
    let bytes = cert
        .tree
        .lookup_path(path)
        .ok_or_else(|| CertificateError::MissingCanisterRanges(subnet.clone()))?;
    let ranges: Vec<(Principal, Principal)> =
        serde_cbor::from_slice(bytes).map_err(|e| CertificateError::MalformedCanisterRanges {
            subnet_id: subnet,
            reason: e.to_string(),
        })?;
    Ok(canister_range_set(ranges))
}

/// Strips the DER prefix from a BLS public key.
pub fn extract_der(buf: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let expected_length = DER_PREFIX.len() + KEY_LENGTH;
    if buf.len() != expected_length {
        return Err(CertificateError::DerKeyLengthMismatch {
            expected: expected_length,
            actual: buf.len(),
        });
    }

    let prefix = &buf[0..DER_PREFIX.len()];
    if prefix[..] != DER_PREFIX[..] {
        return Err(CertificateError::DerPrefixMismatch {
            expected: DER_PREFIX.to_vec(),
            actual: prefix.to_vec(),
        });
    }

    Ok(buf[DER_PREFIX.len()..].to_vec())
}

/// Wraps a raw 96-byte BLS public key in its DER prefix.
pub fn der_encode_bls_key(raw: &[u8]) -> Vec<u8> {
    let mut der = Vec::with_capacity(DER_PREFIX.len() + raw.len());
    der.extend_from_slice(DER_PREFIX);
    der.extend_from_slice(raw);
    der
}
