//! Errors that can occur when using the replica agent.

use crate::agent::status::Status;
use ic_certified_tree::{CertificateError, Label};
use ic_request_types::{Expiry, InvalidRejectCodeError, RejectResponse, RequestId, RequestIdError};
use leb128::read;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::Utf8Error,
    time::Duration,
};
use thiserror::Error;

/// The broad category of an [`AgentError`], for callers deciding whether to retry,
/// reconfigure or report.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ErrorKind {
    /// The caller supplied something invalid: a bad URL, a malformed pre-signed request.
    Input,
    /// A collaborator of the agent failed: the identity could not sign, the root key is
    /// unavailable.
    External,
    /// The replica answered something the protocol does not allow.
    Protocol,
    /// A signature or certificate did not verify, or the signer had no authority.
    Trust,
    /// The request could not be delivered, or the replica answered with an HTTP error.
    Transport,
    /// The replica rejected the request. This is a valid outcome, not a fault.
    Reject,
}

/// An error that occurred when using the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The replica URL was invalid.
    #[error(r#"Invalid Replica URL: "{0}""#)]
    InvalidReplicaUrl(String),

    /// The agent was built with neither a transport nor a URL.
    #[error("No transport or replica URL was configured.")]
    MissingReplicaTransport,

    /// The request timed out.
    #[error("The request timed out.")]
    TimeoutWaitingForResponse,

    /// An error occurred when signing with the identity.
    #[error("Identity had a signing error: {0}")]
    SigningError(String),

    /// The data fetched was invalid CBOR.
    #[error("Invalid CBOR data, could not deserialize: {0}")]
    InvalidCborData(#[from] serde_cbor::Error),

    /// There was an error calculating a request ID.
    #[error("Cannot calculate a RequestID: {0}")]
    CannotCalculateRequestId(#[from] RequestIdError),

    /// The subnet rejected the message, and the rejection is part of certified state.
    #[error("The replica returned a rejection error: reject code {:?}, reject message {}, error code {:?}", .0.reject_code, .0.reject_message, .0.error_code)]
    CertifiedReject(RejectResponse),

    /// The replica may have rejected the message. This rejection cannot be verified as
    /// authentic.
    #[error("The replica returned a rejection error: reject code {:?}, reject message {}, error code {:?}", .0.reject_code, .0.reject_message, .0.error_code)]
    UncertifiedReject(RejectResponse),

    /// The replica returned an HTTP error.
    #[error("The replica returned an HTTP Error: {0}")]
    HttpError(HttpErrorPayload),

    /// The replica does not serve the v3 call endpoint.
    #[error("The replica does not support the v3 call endpoint.")]
    V3EndpointUnsupported,

    /// The status endpoint returned an invalid status.
    #[error("Status endpoint returned an invalid status.")]
    InvalidReplicaStatus,

    /// The call was marked done, but no reply was provided.
    #[error("Call was marked as done but we never saw the reply. Request ID: {0}")]
    RequestStatusDoneNoReply(String),

    /// The lookup path was absent in the certificate, or hidden behind a pruned branch.
    #[error("The lookup path ({0:?}) is absent in the certificate.")]
    LookupPathAbsent(Vec<Label>),

    /// The request status at the requested path was invalid.
    #[error("The request status ({1}) at path {0:?} is invalid.")]
    InvalidRequestStatus(Vec<Label>, String),

    /// The certificate could not be interpreted, or was signed without authority.
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// The certificate signature did not verify.
    #[error("Certificate verification failed.")]
    CertificateVerificationFailed,

    /// The signature verification for a query call failed.
    #[error("Query signature verification failed.")]
    QuerySignatureVerificationFailed,

    /// The subnet that answered is not responsible for the canister.
    #[error("Certificate is not authorized to respond to queries for this canister. While developing: Did you forget to set effective_canister_id?")]
    CertificateNotAuthorized,

    /// The certificate or node signature was older than allowed by the `ingress_expiry`.
    #[error("Certificate is stale (over {}s). Is the computer's clock synchronized?", .0.as_secs())]
    CertificateOutdated(Duration),

    /// The query response did not contain any node signatures.
    #[error("Query response did not contain any node signatures")]
    MissingSignature,

    /// The query response contained a malformed signature.
    #[error("Query response contained a malformed signature")]
    MalformedSignature,

    /// The read-state response contained a malformed public key.
    #[error("Read state response contained a malformed public key")]
    MalformedPublicKey,

    /// The query response contained more node signatures than the subnet has nodes.
    #[error("Query response contained too many signatures ({had}, exceeding the subnet's total nodes: {needed})")]
    TooManySignatures {
        /// The number of provided signatures.
        had: usize,
        /// The number of nodes on the subnet.
        needed: usize,
    },

    /// The status response did not contain a root key.
    #[error("The status response did not contain a root key.  Status: {0}")]
    NoRootKeyInStatus(Status),

    /// No root key is configured and fetching it is disabled.
    #[error("Could not read the root key")]
    CouldNotReadRootKey,

    /// The transport failed to deliver the request.
    #[error("An error happened during communication with the replica: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The response size exceeded the provided limit.
    #[error("Response size exceeded limit.")]
    ResponseSizeExceededLimit,

    /// There was a mismatch between the expected and actual CBOR data during inspection.
    #[error("There is a mismatch between the CBOR encoded call and the arguments: field {field}, value in argument is {value_arg}, value in CBOR is {value_cbor}")]
    CallDataMismatch {
        /// The field that was mismatched.
        field: String,
        /// The value that was expected to be in the CBOR.
        value_arg: String,
        /// The value that was actually in the CBOR.
        value_cbor: String,
    },

    /// A pre-signed request does not carry exactly the fields of its request type.
    #[error("The signed request is malformed: {0}")]
    InvalidSignedRequest(String),

    /// The certified reject code is not one the protocol defines.
    #[error(transparent)]
    InvalidRejectCode(#[from] InvalidRejectCodeError),

    /// A certified value was not valid UTF-8.
    #[error("Error reading UTF-8 string: {0}")]
    Utf8ReadError(#[from] Utf8Error),

    /// A certified number was not valid LEB128.
    #[error("Error reading LEB128 value: {0}")]
    Leb128ReadError(#[from] read::Error),

    /// An error carrying the request it happened for.
    #[error("{error} ({context})")]
    WithRequestContext {
        /// The request the error happened for.
        context: Box<RequestContext>,
        /// The underlying error.
        error: Box<AgentError>,
    },
}

impl AgentError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        use AgentError::*;
        match self {
            InvalidReplicaUrl(_)
            | MissingReplicaTransport
            | CannotCalculateRequestId(_)
            | CallDataMismatch { .. }
            | InvalidSignedRequest(_) => ErrorKind::Input,
            SigningError(_) | CouldNotReadRootKey => ErrorKind::External,
            InvalidCborData(_)
            | V3EndpointUnsupported
            | InvalidReplicaStatus
            | RequestStatusDoneNoReply(_)
            | LookupPathAbsent(_)
            | InvalidRequestStatus(..)
            | NoRootKeyInStatus(_)
            | InvalidRejectCode(_)
            | Utf8ReadError(_)
            | Leb128ReadError(_) => ErrorKind::Protocol,
            Certificate(_)
            | CertificateVerificationFailed
            | QuerySignatureVerificationFailed
            | CertificateNotAuthorized
            | CertificateOutdated(_)
            | MissingSignature
            | MalformedSignature
            | MalformedPublicKey
            | TooManySignatures { .. } => ErrorKind::Trust,
            TimeoutWaitingForResponse
            | HttpError(_)
            | TransportError(_)
            | ResponseSizeExceededLimit => ErrorKind::Transport,
            CertifiedReject(_) | UncertifiedReject(_) => ErrorKind::Reject,
            WithRequestContext { error, .. } => error.kind(),
        }
    }

    /// Attaches the request this error happened for. An error that already carries a
    /// context keeps it.
    pub fn with_context(self, context: RequestContext) -> Self {
        match self {
            e @ AgentError::WithRequestContext { .. } => e,
            error => AgentError::WithRequestContext {
                context: Box::new(context),
                error: Box::new(error),
            },
        }
    }

    /// The error without any attached request context.
    pub fn without_context(&self) -> &AgentError {
        match self {
            AgentError::WithRequestContext { error, .. } => error.without_context(),
            e => e,
        }
    }

    /// The request this error happened for, if known.
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            AgentError::WithRequestContext { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl PartialEq for AgentError {
    fn eq(&self, other: &Self) -> bool {
        // Verify the debug string is the same. Some of the subtypes of this error
        // don't implement Eq or PartialEq, so we cannot rely on derive.
        format!("{self:?}") == format!("{other:?}")
    }
}

impl From<url::ParseError> for AgentError {
    fn from(err: url::ParseError) -> Self {
        AgentError::InvalidReplicaUrl(err.to_string())
    }
}

/// The request an error happened for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// The id of the request.
    pub request_id: Option<RequestId>,
    /// The expiry the request was sent with.
    pub ingress_expiry: Option<Expiry>,
    /// The public key that signed the request.
    pub sender_pubkey: Option<Vec<u8>>,
    /// The signature of the request.
    pub sender_sig: Option<Vec<u8>>,
}

impl Display for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("request id: ")?;
        match &self.request_id {
            Some(id) => Display::fmt(id, f)?,
            None => f.write_str("none")?,
        }
        if let Some(expiry) = &self.ingress_expiry {
            write!(f, ", ingress expiry: {expiry}")?;
        }
        if let Some(key) = &self.sender_pubkey {
            write!(f, ", sender pubkey: {}", hex::encode(key))?;
        }
        if let Some(sig) = &self.sender_sig {
            write!(f, ", sender sig: {}", hex::encode(sig))?;
        }
        Ok(())
    }
}

/// A HTTP error from the replica.
pub struct HttpErrorPayload {
    /// The HTTP status code.
    pub status: u16,
    /// The MIME type of `content`.
    pub content_type: Option<String>,
    /// The body of the error.
    pub content: Vec<u8>,
}

impl HttpErrorPayload {
    fn fmt_human_readable(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        // No matter content_type is TEXT or not,
        // always try to parse it as a String.
        // When fail, print the raw byte array
        f.write_fmt(format_args!(
            "Replica HTTP error: status {}, content type {:?}, content: {}",
            http::StatusCode::from_u16(self.status)
                .map_or_else(|_| format!("{}", self.status), |code| format!("{code}")),
            self.content_type.clone().unwrap_or_default(),
            String::from_utf8(self.content.clone()).unwrap_or_else(|_| format!(
                "(unable to decode content as UTF-8: {:?})",
                self.content
            ))
        ))?;
        Ok(())
    }
}

impl Debug for HttpErrorPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.fmt_human_readable(f)
    }
}

impl Display for HttpErrorPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.fmt_human_readable(f)
    }
}
