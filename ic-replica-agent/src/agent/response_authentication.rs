use crate::agent::{subnet::Subnet, AgentError};
use candid::Principal;
use ic_certified_tree::{canister_range_set, Certificate, HashTree, Label};
use ic_request_types::{
    RejectCode, RejectResponse, ReplyResponse, RequestId, RequestStatusResponse,
};
use std::{collections::HashMap, str::from_utf8};

fn absent(path: &[&[u8]]) -> AgentError {
    AgentError::LookupPathAbsent(path.iter().map(|segment| Label::from(*segment)).collect())
}

/// Looks up a leaf in the tree.
///
/// Returns the value if it was found; otherwise, errors with `LookupPathAbsent`. A path
/// leading into a pruned branch is absent.
pub fn lookup_value<'t>(tree: &'t HashTree, path: &[&[u8]]) -> Result<&'t [u8], AgentError> {
    tree.lookup_path(path).ok_or_else(|| absent(path))
}

/// Looks up a subtree in the tree.
pub fn lookup_tree<'t>(tree: &'t HashTree, path: &[&[u8]]) -> Result<&'t HashTree, AgentError> {
    tree.lookup_subtree(path).ok_or_else(|| absent(path))
}

fn lookup_number(tree: &HashTree, path: &[&[u8]]) -> Result<u64, AgentError> {
    let mut readable = lookup_value(tree, path)?;
    Ok(leb128::read::unsigned(&mut readable)?)
}

/// The certified time of the state the certificate is about, in nanoseconds since the epoch.
pub(crate) fn lookup_time(certificate: &Certificate) -> Result<u64, AgentError> {
    lookup_number(&certificate.tree, &[b"time"])
}

pub(crate) fn lookup_request_status(
    certificate: &Certificate,
    request_id: &RequestId,
) -> Result<RequestStatusResponse, AgentError> {
    let path_status: [&[u8]; 3] = [b"request_status", request_id.as_slice(), b"status"];
    let Some(status) = certificate.tree.lookup_path(path_status) else {
        return Ok(RequestStatusResponse::Unknown);
    };
    match from_utf8(status)? {
        "done" => Ok(RequestStatusResponse::Done),
        "processing" => Ok(RequestStatusResponse::Processing),
        "received" => Ok(RequestStatusResponse::Received),
        "rejected" => lookup_rejection(certificate, request_id),
        "replied" => lookup_reply(certificate, request_id),
        other => Err(AgentError::InvalidRequestStatus(
            path_status.iter().map(|s| Label::from(*s)).collect(),
            other.to_string(),
        )),
    }
}

fn lookup_rejection(
    certificate: &Certificate,
    request_id: &RequestId,
) -> Result<RequestStatusResponse, AgentError> {
    let tree = &certificate.tree;
    let id = request_id.as_slice();
    let code = lookup_number(tree, &[b"request_status", id, b"reject_code"])?;
    let reject_code = RejectCode::try_from(code)?;
    let reject_message =
        from_utf8(lookup_value(tree, &[b"request_status", id, b"reject_message"])?)?.to_string();
    let error_code = tree
        .lookup_path([&b"request_status"[..], id, b"error_code"])
        .map(from_utf8)
        .transpose()?
        .map(str::to_string);

    Ok(RequestStatusResponse::Rejected(RejectResponse {
        reject_code,
        reject_message,
        error_code,
    }))
}

fn lookup_reply(
    certificate: &Certificate,
    request_id: &RequestId,
) -> Result<RequestStatusResponse, AgentError> {
    let path: [&[u8]; 3] = [b"request_status", request_id.as_slice(), b"reply"];
    let arg = lookup_value(&certificate.tree, &path)?.to_vec();
    Ok(RequestStatusResponse::Replied(ReplyResponse { arg }))
}

/// Reads the subnet that signed `certificate`: its key, nodes and canister ranges.
///
/// The certificate must answer a `read_state` for `["subnet", <subnet id>]`.
pub(crate) fn lookup_subnet(
    certificate: &Certificate,
    root_key: &[u8],
) -> Result<Subnet, AgentError> {
    let subnet_id = match &certificate.delegation {
        Some(delegation) => delegation.subnet_principal(),
        None => Principal::self_authenticating(root_key),
    };
    let subnet_tree = lookup_tree(&certificate.tree, &[b"subnet", subnet_id.as_slice()])?;
    let key = lookup_value(subnet_tree, &[b"public_key"])?.to_vec();
    let canister_ranges = match &certificate.delegation {
        Some(delegation) => delegation.canister_ranges()?,
        None => canister_range_set(serde_cbor::from_slice::<Vec<(Principal, Principal)>>(
            lookup_value(subnet_tree, &[b"canister_ranges"])?,
        )?),
    };

    let mut node_keys = HashMap::new();
    for (node_id, node) in lookup_tree(subnet_tree, &[b"node"])?.children() {
        let node_key = lookup_value(node, &[b"public_key"])?;
        node_keys.insert(Principal::from_slice(node_id.as_bytes()), node_key.to_vec());
    }
    Ok(Subnet {
        id: subnet_id,
        key,
        node_keys,
        canister_ranges,
    })
}
