use crate::{export::Principal, identity::Identity, Signature};
use ic_request_types::EnvelopeContent;

/// The anonymous identity.
///
/// The caller will be anonymous and requests are sent unsigned.
#[derive(Debug, Copy, Clone)]
pub struct AnonymousIdentity;

impl Identity for AnonymousIdentity {
    fn sender(&self) -> Result<Principal, String> {
        Ok(Principal::anonymous())
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        None
    }

    fn sign(&self, _: &EnvelopeContent) -> Result<Signature, String> {
        Ok(Signature::default())
    }
}
