//! Requests signed ahead of time and submitted later, possibly from another machine.

use crate::{
    agent::{
        Agent, AgentError, CallResponse, Envelope, EnvelopeContent, Expiry, QueryResponse,
        RequestContext, RequestStatusResponse, SignedQuery, SignedRequestStatus, SignedUpdate,
    },
    export::Principal,
};
use http::Method;
use ic_certified_tree::{Certificate, Label};
use ic_request_types::{hash_of_map, FieldMap, HashableValue, RequestId};
use serde_cbor::Value;
use std::fmt::Debug;

use super::{query_reply, response_authentication::lookup_request_status, IngressExpiry};

impl Agent {
    /// Signs a query without sending it.
    pub fn sign_query(
        &self,
        canister_id: Principal,
        effective_canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        ingress_expiry: Option<Expiry>,
    ) -> Result<SignedQuery, AgentError> {
        let content = EnvelopeContent::Query {
            ingress_expiry: Expiry::from_nanos(0),
            sender: self.sender()?,
            canister_id,
            method_name,
            arg,
            nonce: None,
        };
        let signed = self.sign_content(content, ingress_expiry.map(IngressExpiry::At))?;
        match signed.content {
            EnvelopeContent::Query {
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
                nonce,
            } => Ok(SignedQuery {
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
                effective_canister_id,
                signed_query: signed.body,
                nonce,
            }),
            other => Err(changed_request_type("query", &other)),
        }
    }

    /// Signs an update call without sending it.
    pub fn sign_update(
        &self,
        canister_id: Principal,
        effective_canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        ingress_expiry: Option<Expiry>,
    ) -> Result<SignedUpdate, AgentError> {
        let content = EnvelopeContent::Call {
            nonce: None,
            ingress_expiry: Expiry::from_nanos(0),
            sender: self.sender()?,
            canister_id,
            method_name,
            arg,
        };
        let signed = self.sign_content(content, ingress_expiry.map(IngressExpiry::At))?;
        match signed.content {
            EnvelopeContent::Call {
                nonce,
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
            } => Ok(SignedUpdate {
                nonce,
                ingress_expiry,
                sender,
                canister_id,
                method_name,
                arg,
                effective_canister_id,
                signed_update: signed.body,
                request_id: signed.request_id,
            }),
            other => Err(changed_request_type("call", &other)),
        }
    }

    /// Signs a `read_state` request for the status of a call, for use with
    /// [`wait_signed`](Agent::wait_signed).
    pub fn sign_request_status(
        &self,
        effective_canister_id: Principal,
        request_id: RequestId,
    ) -> Result<SignedRequestStatus, AgentError> {
        let content = self.read_state_content(vec![request_status_path(&request_id)])?;
        let signed = self.sign_content(content, None)?;
        match signed.content {
            EnvelopeContent::ReadState {
                ingress_expiry,
                sender,
                ..
            } => Ok(SignedRequestStatus {
                ingress_expiry,
                sender,
                effective_canister_id,
                request_id,
                signed_request_status: signed.body,
            }),
            other => Err(changed_request_type("read_state", &other)),
        }
    }

    /// Sends a signed query after checking that its envelope matches its fields.
    ///
    /// Unlike [`QueryBuilder::call`](super::QueryBuilder::call), an answer whose node
    /// signatures are too old is not retried: the envelope is already signed, so it cannot be
    /// sent as a fresh query. On [`CertificateOutdated`](AgentError::CertificateOutdated),
    /// sign the query again with [`sign_query`](Self::sign_query) and resubmit it.
    pub async fn query_signed(&self, signed_query: &SignedQuery) -> Result<Vec<u8>, AgentError> {
        let envelope = decode_signed_envelope(&signed_query.signed_query, "query")?;
        let EnvelopeContent::Query {
            ingress_expiry,
            sender,
            canister_id,
            method_name,
            arg,
            nonce,
        } = &envelope.content
        else {
            return Err(changed_request_type("query", &envelope.content));
        };
        check_field("ingress_expiry", &signed_query.ingress_expiry, ingress_expiry)?;
        check_field("sender", &signed_query.sender, sender)?;
        check_field("canister_id", &signed_query.canister_id, canister_id)?;
        check_field("method_name", &signed_query.method_name, method_name)?;
        check_field("arg", &signed_query.arg, arg)?;
        check_field("nonce", &signed_query.nonce, nonce)?;

        let request_id = envelope.content.to_request_id();
        let context = signed_context(&envelope, request_id);
        let effective_canister_id = signed_query.effective_canister_id;
        let path = format!("v2/canister/{}/query", effective_canister_id.to_text());
        let result = async {
            let response = self
                .execute(Method::POST, &path, Some(signed_query.signed_query.clone()))
                .await?;
            let response: QueryResponse = serde_cbor::from_slice(&response.body)?;
            if self.verify_query_signatures {
                let subnet = self.get_subnet_by_canister(&effective_canister_id).await?;
                self.verify_query_response(&response, request_id, subnet, effective_canister_id)
                    .await?;
            }
            query_reply(response)
        };
        result.await.map_err(|e| e.with_context(context))
    }

    /// Sends a signed update call after checking that its envelope matches its fields.
    pub async fn update_signed(
        &self,
        signed_update: &SignedUpdate,
    ) -> Result<CallResponse<Vec<u8>>, AgentError> {
        let envelope = decode_signed_envelope(&signed_update.signed_update, "call")?;
        let EnvelopeContent::Call {
            nonce,
            ingress_expiry,
            sender,
            canister_id,
            method_name,
            arg,
        } = &envelope.content
        else {
            return Err(changed_request_type("call", &envelope.content));
        };
        check_field("nonce", &signed_update.nonce, nonce)?;
        check_field("ingress_expiry", &signed_update.ingress_expiry, ingress_expiry)?;
        check_field("sender", &signed_update.sender, sender)?;
        check_field("canister_id", &signed_update.canister_id, canister_id)?;
        check_field("method_name", &signed_update.method_name, method_name)?;
        check_field("arg", &signed_update.arg, arg)?;
        let request_id = envelope.content.to_request_id();
        check_field("request_id", &signed_update.request_id, &request_id)?;

        let context = signed_context(&envelope, request_id);
        let effective_canister_id = signed_update.effective_canister_id;
        let body = &signed_update.signed_update;
        let result = async {
            if self.use_call_v3 {
                let path = format!("v3/canister/{}/call", effective_canister_id.to_text());
                match self.execute(Method::POST, &path, Some(body.clone())).await {
                    Ok(response) => {
                        return self.read_call_response(
                            request_id,
                            effective_canister_id,
                            response,
                            true,
                        )
                    }
                    Err(AgentError::V3EndpointUnsupported) => {
                        tracing::warn!(%effective_canister_id, "the replica has no v3 call endpoint, falling back to v2");
                    }
                    Err(error) => return Err(error),
                }
            }
            let path = format!("v2/canister/{}/call", effective_canister_id.to_text());
            let response = self.execute(Method::POST, &path, Some(body.clone())).await?;
            self.read_call_response(request_id, effective_canister_id, response, false)
        };
        result
            .await
            .map(|response| response.map(|(reply, _)| reply))
            .map_err(|e| e.with_context(context))
    }

    /// Sends a signed request status after checking that its envelope matches its fields.
    /// Returns the status and the certificate it was read from.
    pub async fn request_status_signed(
        &self,
        signed_request_status: &SignedRequestStatus,
    ) -> Result<(RequestStatusResponse, Certificate), AgentError> {
        let envelope =
            decode_signed_envelope(&signed_request_status.signed_request_status, "read_state")?;
        let EnvelopeContent::ReadState {
            ingress_expiry,
            sender,
            paths,
        } = &envelope.content
        else {
            return Err(changed_request_type("read_state", &envelope.content));
        };
        check_field(
            "ingress_expiry",
            &signed_request_status.ingress_expiry,
            ingress_expiry,
        )?;
        check_field("sender", &signed_request_status.sender, sender)?;
        check_field(
            "paths",
            &vec![request_status_path(&signed_request_status.request_id)],
            paths,
        )?;

        let context = signed_context(&envelope, envelope.content.to_request_id());
        let effective_canister_id = signed_request_status.effective_canister_id;
        let path = format!("v2/canister/{}/read_state", effective_canister_id.to_text());
        let result = async {
            self.fetch_root_key_if_needed().await?;
            let response = self
                .execute(
                    Method::POST,
                    &path,
                    Some(signed_request_status.signed_request_status.clone()),
                )
                .await?;
            let certificate = self.read_certificate(&response.body, effective_canister_id, true)?;
            let status = lookup_request_status(&certificate, &signed_request_status.request_id)?;
            Ok((status, certificate))
        };
        result.await.map_err(|e: AgentError| e.with_context(context))
    }
}

fn request_status_path(request_id: &RequestId) -> Vec<Label> {
    vec!["request_status".into(), request_id.to_vec().into()]
}

fn changed_request_type(expected: &str, content: &EnvelopeContent) -> AgentError {
    AgentError::InvalidSignedRequest(format!(
        "expected a `{expected}` request, found `{}`",
        content.request_type()
    ))
}

fn signed_context(envelope: &Envelope, request_id: RequestId) -> RequestContext {
    RequestContext {
        request_id: Some(request_id),
        ingress_expiry: Some(envelope.content.ingress_expiry()),
        sender_pubkey: envelope.sender_pubkey.clone(),
        sender_sig: envelope.sender_sig.clone(),
    }
}

fn check_field<T: PartialEq + Debug>(
    field: &str,
    value_arg: &T,
    value_cbor: &T,
) -> Result<(), AgentError> {
    if value_arg == value_cbor {
        Ok(())
    } else {
        Err(AgentError::CallDataMismatch {
            field: field.to_string(),
            value_arg: format!("{value_arg:?}"),
            value_cbor: format!("{value_cbor:?}"),
        })
    }
}

/// Decodes a signed envelope, checking that its content carries exactly the fields of a
/// `request_type` request, and that the typed content hashes to the same request id as the
/// raw one.
fn decode_signed_envelope(bytes: &[u8], request_type: &str) -> Result<Envelope, AgentError> {
    let value: Value = serde_cbor::from_slice(bytes)?;
    let content = match &value {
        Value::Map(envelope) => envelope.get(&Value::Text("content".to_string())),
        _ => None,
    }
    .ok_or_else(|| AgentError::InvalidSignedRequest("the envelope has no content".to_string()))?;
    let fields = FieldMap::try_from(content)?;

    match fields.get("request_type") {
        Some(HashableValue::Text(found)) if found == request_type => {}
        found => {
            return Err(AgentError::InvalidSignedRequest(format!(
                "expected a `{request_type}` request, found {found:?}"
            )))
        }
    }
    let declared = EnvelopeContent::declared_fields(request_type).ok_or_else(|| {
        AgentError::InvalidSignedRequest(format!("unknown request type `{request_type}`"))
    })?;
    if let Some(name) = fields
        .names()
        .into_iter()
        .find(|name| !declared.iter().any(|(declared, _)| declared == name))
    {
        return Err(AgentError::InvalidSignedRequest(format!(
            "unexpected field `{name}`"
        )));
    }
    if let Some((name, _)) = declared
        .iter()
        .find(|(name, required)| *required && fields.get(name).is_none())
    {
        return Err(AgentError::InvalidSignedRequest(format!(
            "missing field `{name}`"
        )));
    }

    let envelope: Envelope = serde_cbor::from_slice(bytes)?;
    if envelope.content.to_request_id() != RequestId::new(&hash_of_map(&fields)) {
        return Err(AgentError::InvalidSignedRequest(
            "the content does not hash to its request id".to_string(),
        ));
    }
    Ok(envelope)
}
