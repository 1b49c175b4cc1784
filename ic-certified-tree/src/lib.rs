//! Certified state returned by replicas.
//!
//! A [`Certificate`] carries a [`HashTree`], a partial view of the replicated state,
//! together with a BLS signature over the tree's root digest. The signature is made
//! either by the network root key or by a subnet key that the root key delegated to.
//!
//! Nothing read out of a tree should be trusted before [`Certificate::verify`] succeeds.
#![warn(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]

pub mod certificate;
pub mod error;
pub mod hash_tree;

#[doc(inline)]
pub use certificate::{
    canister_range_set, der_encode_bls_key, extract_der, BlsVerifier, CanisterRanges, Certificate,
    Delegation, PrincipalStep, SignatureVerifier,
};
#[doc(inline)]
pub use error::CertificateError;
#[doc(inline)]
pub use hash_tree::{empty, fork, label, leaf, pruned, pruned_from_hex, HashTree, Label};
