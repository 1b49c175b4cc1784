//! Types for the [HTTP interface](https://internetcomputer.org/docs/current/references/ic-interface-spec#http-interface)
//! of a replica: request envelopes, their request ids, ingress expiries and the
//! responses of the `call`, `query` and `read_state` endpoints.

#![warn(missing_docs, missing_debug_implementations)]
#![deny(elided_lifetimes_in_paths)]

use candid::Principal;
use ic_certified_tree::Label;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

mod expiry;
mod request_id;
pub mod signed;

pub use expiry::{Expiry, MINUTE_ROUNDING_THRESHOLD};
pub use request_id::{
    error::RequestIdFromStringError, hash_of_map, hash_value, to_request_id, FieldMap,
    HashableValue, RequestId, RequestIdError, Sha256Hash, ToHashable,
};

const IC_RESPONSE_DOMAIN_SEPARATOR: &[u8; 12] = b"\x0Bic-response";
const IC_REQUEST_DELEGATION_DOMAIN_SEPARATOR: &[u8] = b"\x1Aic-request-auth-delegation";

/// The authentication envelope, containing the contents and their signature.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Envelope {
    /// The data that is signed by the caller.
    pub content: EnvelopeContent,
    /// The public key of the self-signing principal this request is from.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub sender_pubkey: Option<Vec<u8>>,
    /// A cryptographic signature authorizing the request. When delegations are involved,
    /// `sender_sig` is made by the tail of the delegation chain and `sender_pubkey` is its head.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub sender_sig: Option<Vec<u8>>,
    /// The chain of delegations connecting `sender_pubkey` to `sender_sig`, in that order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_delegation: Option<Vec<SignedDelegation>>,
}

impl Envelope {
    /// Encodes the envelope as self-describing CBOR, the format of the HTTP interface.
    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut serializer = serde_cbor::Serializer::new(Vec::new());
        serializer
            .self_describe()
            .expect("infallible write to a Vec");
        self.serialize(&mut serializer)
            .expect("infallible Envelope::serialize");
        serializer.into_inner()
    }
}

/// The content of a request, not including any signature information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum EnvelopeContent {
    /// A replicated call to a canister method.
    Call {
        /// A random series of bytes to uniquely identify this message.
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        nonce: Option<Vec<u8>>,
        /// The deadline after which this request is no longer valid.
        ingress_expiry: Expiry,
        /// The principal that is sending this request.
        sender: Principal,
        /// The ID of the canister to be called.
        canister_id: Principal,
        /// The name of the canister method to be called.
        method_name: String,
        /// The argument to pass to the canister method.
        #[serde(with = "serde_bytes")]
        arg: Vec<u8>,
    },
    /// A request for data from the state tree.
    ReadState {
        /// The deadline after which this request is no longer valid.
        ingress_expiry: Expiry,
        /// The principal that is sending this request.
        sender: Principal,
        /// The paths within the state tree to fetch.
        paths: Vec<Vec<Label>>,
    },
    /// An unreplicated call to a canister query method.
    Query {
        /// The deadline after which this request is no longer valid.
        ingress_expiry: Expiry,
        /// The principal that is sending this request.
        sender: Principal,
        /// The ID of the canister to be called.
        canister_id: Principal,
        /// The name of the canister method to be called.
        method_name: String,
        /// The argument to pass to the canister method.
        #[serde(with = "serde_bytes")]
        arg: Vec<u8>,
        /// A random series of bytes to uniquely identify this message.
        #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
        nonce: Option<Vec<u8>>,
    },
}

impl EnvelopeContent {
    /// The value of `request_type` for this content.
    pub fn request_type(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Query { .. } => "query",
            Self::ReadState { .. } => "read_state",
        }
    }

    /// The fields a request of the given type may carry, and whether each is required.
    pub fn declared_fields(request_type: &str) -> Option<&'static [(&'static str, bool)]> {
        const CALL: &[(&str, bool)] = &[
            ("request_type", true),
            ("nonce", false),
            ("ingress_expiry", true),
            ("sender", true),
            ("canister_id", true),
            ("method_name", true),
            ("arg", true),
        ];
        const READ_STATE: &[(&str, bool)] = &[
            ("request_type", true),
            ("ingress_expiry", true),
            ("sender", true),
            ("paths", true),
        ];
        match request_type {
            "call" | "query" => Some(CALL),
            "read_state" => Some(READ_STATE),
            _ => None,
        }
    }

    /// Returns the `ingress_expiry` field common to all variants.
    pub fn ingress_expiry(&self) -> Expiry {
        let (Self::Call { ingress_expiry, .. }
        | Self::Query { ingress_expiry, .. }
        | Self::ReadState { ingress_expiry, .. }) = self;
        *ingress_expiry
    }

    /// Replaces the `ingress_expiry` field.
    pub fn set_ingress_expiry(&mut self, expiry: Expiry) {
        let (Self::Call { ingress_expiry, .. }
        | Self::Query { ingress_expiry, .. }
        | Self::ReadState { ingress_expiry, .. }) = self;
        *ingress_expiry = expiry;
    }

    /// Returns the `sender` field common to all variants.
    pub fn sender(&self) -> &Principal {
        let (Self::Call { sender, .. } | Self::Query { sender, .. } | Self::ReadState { sender, .. }) =
            self;
        sender
    }

    /// The nonce, for calls and queries.
    pub fn nonce_mut(&mut self) -> Option<&mut Option<Vec<u8>>> {
        match self {
            Self::Call { nonce, .. } | Self::Query { nonce, .. } => Some(nonce),
            Self::ReadState { .. } => None,
        }
    }

    /// The fields of this content, as they are hashed into its request id.
    pub fn field_map(&self) -> FieldMap {
        let map = FieldMap::new().with("request_type", self.request_type());
        match self {
            Self::Call {
                nonce,
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
            }
            | Self::Query {
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
                nonce,
            } => map
                .with_opt_bytes("nonce", nonce.clone())
                .with("ingress_expiry", ingress_expiry)
                .with("sender", sender)
                .with("canister_id", canister_id)
                .with("method_name", method_name)
                .with_bytes("arg", arg.clone()),
            Self::ReadState {
                ingress_expiry,
                sender,
                paths,
            } => map
                .with("ingress_expiry", ingress_expiry)
                .with("sender", sender)
                .with("paths", paths),
        }
    }

    /// Converts the envelope content to a request ID.
    pub fn to_request_id(&self) -> RequestId {
        RequestId::new(&hash_of_map(&self.field_map()))
    }
}

impl ToHashable for EnvelopeContent {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Map(self.field_map())
    }
}

/// The response from a request to the `read_state` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReadStateResponse {
    /// The CBOR-encoded certificate holding the requested paths.
    #[serde(with = "serde_bytes")]
    pub certificate: Vec<u8>,
}

/// The parsed response from a request to the v3 `call` endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransportCallResponse {
    /// The replica responded with a certified response.
    Replied {
        /// The CBOR serialized certificate for the call response.
        #[serde(with = "serde_bytes")]
        certificate: Vec<u8>,
    },

    /// The replica responded with a non replicated rejection.
    NonReplicatedRejection(RejectResponse),

    /// The replica accepted the call but did not wait for its completion. The status of the
    /// request must be polled.
    Accepted,
}

/// The response from a request to the `call` endpoint.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum CallResponse<Out> {
    /// The call completed, and the response is available.
    Response(Out),
    /// The call was accepted, and the request id should be used to poll for the response.
    Poll(RequestId),
}

impl<Out> CallResponse<Out> {
    /// Maps the inner value, if this is `Response`.
    #[inline]
    pub fn map<Out2>(self, f: impl FnOnce(Out) -> Out2) -> CallResponse<Out2> {
        match self {
            Self::Poll(p) => CallResponse::Poll(p),
            Self::Response(r) => CallResponse::Response(f(r)),
        }
    }
}

/// Possible responses to a query call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
    /// The request was successfully replied to.
    Replied {
        /// The reply from the canister.
        reply: ReplyResponse,

        /// The list of node signatures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        signatures: Vec<NodeSignature>,
    },
    /// The request was rejected.
    Rejected {
        /// The rejection from the canister.
        #[serde(flatten)]
        reject: RejectResponse,

        /// The list of node signatures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        signatures: Vec<NodeSignature>,
    },
}

impl QueryResponse {
    /// The fields a node signs for this response, at `timestamp`.
    pub fn signed_fields(&self, request_id: RequestId, timestamp: u64) -> FieldMap {
        let map = match self {
            Self::Replied { reply, .. } => FieldMap::new()
                .with("status", "replied")
                .with("reply", FieldMap::new().with_bytes("arg", reply.arg.clone())),
            Self::Rejected { reject, .. } => FieldMap::new()
                .with("status", "rejected")
                .with("reject_code", reject.reject_code as u64)
                .with("reject_message", &reject.reject_message)
                .with_opt("error_code", reject.error_code.as_ref()),
        };
        map.with("timestamp", timestamp)
            .with("request_id", request_id)
    }

    /// The message a node signs for this response: `"\x0Bic-response"` followed by the hash
    /// of [`signed_fields`](Self::signed_fields).
    pub fn signable(&self, request_id: RequestId, timestamp: u64) -> Vec<u8> {
        let mut signable = Vec::with_capacity(44);
        signable.extend_from_slice(IC_RESPONSE_DOMAIN_SEPARATOR);
        signable.extend_from_slice(&hash_of_map(&self.signed_fields(request_id, timestamp)));
        signable
    }

    /// The signatures field present in both variants.
    pub fn signatures(&self) -> &[NodeSignature] {
        match self {
            Self::Rejected { signatures, .. } => signatures,
            Self::Replied { signatures, .. } => signatures,
        }
    }
}

/// An execution error received from the replica.
#[derive(Debug, Clone, Serialize, Deserialize, Ord, PartialOrd, Eq, PartialEq)]
pub struct RejectResponse {
    /// The [reject code](https://internetcomputer.org/docs/current/references/ic-interface-spec#reject-codes) returned by the replica.
    pub reject_code: RejectCode,
    /// The rejection message.
    pub reject_message: String,
    /// The optional [error code](https://internetcomputer.org/docs/current/references/ic-interface-spec#error-codes) returned by the replica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// See the [interface spec](https://internetcomputer.org/docs/current/references/ic-interface-spec#reject-codes).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr, Ord, PartialOrd,
)]
#[repr(u8)]
pub enum RejectCode {
    /// Fatal system error, retry unlikely to be useful
    SysFatal = 1,
    /// Transient system error, retry might be possible.
    SysTransient = 2,
    /// Invalid destination (e.g. canister/account does not exist)
    DestinationInvalid = 3,
    /// Explicit reject by the canister.
    CanisterReject = 4,
    /// Canister error (e.g., trap, no response)
    CanisterError = 5,
    /// Response unknown; the system stopped waiting for it.
    SysUnknown = 6,
}

impl TryFrom<u64> for RejectCode {
    type Error = InvalidRejectCodeError;

    fn try_from(value: u64) -> Result<Self, InvalidRejectCodeError> {
        match value {
            1 => Ok(RejectCode::SysFatal),
            2 => Ok(RejectCode::SysTransient),
            3 => Ok(RejectCode::DestinationInvalid),
            4 => Ok(RejectCode::CanisterReject),
            5 => Ok(RejectCode::CanisterError),
            6 => Ok(RejectCode::SysUnknown),
            _ => Err(InvalidRejectCodeError(value)),
        }
    }
}

/// Error returned from `RejectCode::try_from`.
#[derive(Debug, Error)]
#[error("Invalid reject code {0}")]
pub struct InvalidRejectCodeError(pub u64);

/// The status of a call, read from `request_status/<request_id>/status` in the state tree.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum RequestStatusResponse {
    /// The status of the request is unknown.
    Unknown,
    /// The request has been received, and will probably get processed.
    Received,
    /// The request is currently being processed.
    Processing,
    /// The request has been successfully replied to.
    Replied(ReplyResponse),
    /// The request has been rejected.
    Rejected(RejectResponse),
    /// The call has been completed, and it has been long enough that the reply/reject data has
    /// been purged, but the call has not expired yet.
    Done,
}

/// A successful reply to a canister call.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct ReplyResponse {
    /// The reply message, likely Candid-encoded.
    #[serde(with = "serde_bytes")]
    pub arg: Vec<u8>,
}

/// A delegation from one key to another.
///
/// If key A signs a delegation containing key B, then key B may be used to
/// authenticate as key A's corresponding principal(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// The delegated-to key.
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    /// A nanosecond timestamp after which this delegation is no longer valid.
    pub expiration: u64,
    /// If present, this delegation only applies to requests sent to one of these canisters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<Principal>>,
}

impl Delegation {
    /// Returns the signable form of the delegation: `\x1Aic-request-auth-delegation`
    /// followed by the hash of its fields.
    pub fn signable(&self) -> Vec<u8> {
        let fields = FieldMap::new()
            .with_bytes("pubkey", self.pubkey.clone())
            .with("expiration", self.expiration)
            .with_opt("targets", self.targets.as_ref());
        let mut bytes = Vec::with_capacity(59);
        bytes.extend_from_slice(IC_REQUEST_DELEGATION_DOMAIN_SEPARATOR);
        bytes.extend_from_slice(&hash_of_map(&fields));
        bytes
    }
}

/// A [`Delegation`] that has been signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    /// The signed delegation.
    pub delegation: Delegation,
    /// The signature for the delegation.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// A response signature from an individual node.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, Ord, PartialEq, PartialOrd)]
pub struct NodeSignature {
    /// The timestamp that the signature was created at.
    pub timestamp: u64,
    /// The signature.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// The ID of the node.
    pub identity: Principal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canister() -> Principal {
        Principal::from_slice(b"\x00\x00\x00\x00\x00\x00\x04\xD2")
    }

    #[test]
    fn call_content_matches_public_example() {
        let content = EnvelopeContent::Call {
            nonce: None,
            ingress_expiry: Expiry::from_nanos(1_685_570_400_000_000_000),
            sender: Principal::anonymous(),
            canister_id: canister(),
            method_name: "hello".to_string(),
            arg: b"DIDL\x00\xFD*".to_vec(),
        };
        assert_eq!(
            content.to_request_id().to_string(),
            "1d1091364d6bb8a6c16b203ee75467d59ead468f523eb058880ae8ec80e2b101"
        );
    }

    #[test]
    fn nonce_changes_request_id() {
        let mut content = EnvelopeContent::Query {
            ingress_expiry: Expiry::from_nanos(1),
            sender: Principal::anonymous(),
            canister_id: canister(),
            method_name: "greet".to_string(),
            arg: vec![],
            nonce: None,
        };
        let without = content.to_request_id();
        *content.nonce_mut().unwrap() = Some(vec![1, 2, 3]);
        assert_ne!(without, content.to_request_id());
    }

    #[test]
    fn content_cbor_has_exactly_declared_fields() {
        let content = EnvelopeContent::ReadState {
            ingress_expiry: Expiry::from_nanos(7),
            sender: Principal::anonymous(),
            paths: vec![vec!["time".into()]],
        };
        let value: serde_cbor::Value =
            serde_cbor::from_slice(&serde_cbor::to_vec(&content).unwrap()).unwrap();
        let map = FieldMap::try_from(&value).unwrap();
        let mut names = map.names();
        names.sort_unstable();
        let mut declared: Vec<&str> = EnvelopeContent::declared_fields("read_state")
            .unwrap()
            .iter()
            .map(|(n, _)| *n)
            .collect();
        declared.sort_unstable();
        assert_eq!(names, declared);
        assert_eq!(
            to_request_id(&map).unwrap(),
            content.to_request_id(),
            "decoded CBOR hashes like the typed content"
        );
    }

    #[test]
    fn envelope_encoding_is_self_describing() {
        let envelope = Envelope {
            content: EnvelopeContent::ReadState {
                ingress_expiry: Expiry::from_nanos(7),
                sender: Principal::anonymous(),
                paths: vec![],
            },
            sender_pubkey: None,
            sender_sig: None,
            sender_delegation: None,
        };
        let bytes = envelope.encode_bytes();
        assert_eq!(&bytes[..3], &[0xd9, 0xd9, 0xf7]);
        let decoded: Envelope = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded.content, envelope.content);
    }

    #[test]
    fn query_response_decodes_reject() {
        let reject = QueryResponse::Rejected {
            reject: RejectResponse {
                reject_code: RejectCode::CanisterError,
                reject_message: "trapped".to_string(),
                error_code: Some("IC0503".to_string()),
            },
            signatures: vec![],
        };
        let bytes = serde_cbor::to_vec(&reject).unwrap();
        assert_eq!(serde_cbor::from_slice::<QueryResponse>(&bytes).unwrap(), reject);
    }

    #[test]
    fn signed_fields_depend_on_status() {
        let id = RequestId::new(&[1; 32]);
        let replied = QueryResponse::Replied {
            reply: ReplyResponse { arg: vec![1] },
            signatures: vec![],
        };
        assert_eq!(
            replied.signed_fields(id, 5).names(),
            vec!["status", "reply", "timestamp", "request_id"]
        );
        let rejected = QueryResponse::Rejected {
            reject: RejectResponse {
                reject_code: RejectCode::CanisterReject,
                reject_message: "no".to_string(),
                error_code: None,
            },
            signatures: vec![],
        };
        assert_eq!(
            rejected.signed_fields(id, 5).names(),
            vec!["status", "reject_code", "reject_message", "timestamp", "request_id"]
        );
        let signable = replied.signable(id, 5);
        assert_eq!(&signable[..12], b"\x0Bic-response");
        assert_eq!(signable.len(), 44);
        assert_ne!(signable, replied.signable(id, 6));
    }

    #[test]
    fn reject_code_from_u64() {
        assert_eq!(RejectCode::try_from(5).unwrap(), RejectCode::CanisterError);
        assert_eq!(RejectCode::try_from(6).unwrap(), RejectCode::SysUnknown);
        assert!(RejectCode::try_from(0).is_err());
    }
}
