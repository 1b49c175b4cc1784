//! Requests that were signed ahead of time, to be submitted later, possibly by another
//! process.

use crate::{Expiry, RequestId};
use candid::Principal;
use serde::{Deserialize, Serialize};

/// A signed query request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedQuery {
    /// The deadline after which the request is no longer valid.
    pub ingress_expiry: Expiry,
    /// The principal that sent the request.
    pub sender: Principal,
    /// The canister being called.
    pub canister_id: Principal,
    /// The method being called.
    pub method_name: String,
    /// The argument of the call.
    #[serde(with = "serde_bytes")]
    pub arg: Vec<u8>,
    /// The canister used to route the request.
    pub effective_canister_id: Principal,
    /// The CBOR-encoded envelope.
    #[serde(with = "serde_bytes")]
    pub signed_query: Vec<u8>,
    /// The nonce of the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
}

/// A signed update request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedUpdate {
    /// The nonce of the request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
    /// The deadline after which the request is no longer valid.
    pub ingress_expiry: Expiry,
    /// The principal that sent the request.
    pub sender: Principal,
    /// The canister being called.
    pub canister_id: Principal,
    /// The method being called.
    pub method_name: String,
    /// The argument of the call.
    #[serde(with = "serde_bytes")]
    pub arg: Vec<u8>,
    /// The canister used to route the request.
    pub effective_canister_id: Principal,
    /// The CBOR-encoded envelope.
    #[serde(with = "serde_bytes")]
    pub signed_update: Vec<u8>,
    /// The request id, used to poll for the result.
    pub request_id: RequestId,
}

/// A signed `read_state` request for the status of a call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedRequestStatus {
    /// The deadline after which the request is no longer valid.
    pub ingress_expiry: Expiry,
    /// The principal that sent the request.
    pub sender: Principal,
    /// The canister used to route the request.
    pub effective_canister_id: Principal,
    /// The call whose status is requested.
    pub request_id: RequestId,
    /// The CBOR-encoded envelope.
    #[serde(with = "serde_bytes")]
    pub signed_request_status: Vec<u8>,
}
