//! Checks of the node signatures on query responses.

use crate::agent::{subnet::Subnet, AgentError};
use ed25519_consensus::{Signature, VerificationKey};
use ic_request_types::{QueryResponse, RequestId};
use std::time::Duration;
use time::OffsetDateTime;

const ED25519_DER_PREFIX: [u8; 12] = [48, 42, 48, 5, 6, 3, 43, 101, 112, 3, 33, 0];

/// Wraps a raw 32-byte Ed25519 key in its DER encoding, as node keys are certified.
pub fn der_encode_ed25519_key(raw: &[u8; 32]) -> Vec<u8> {
    let mut der = Vec::with_capacity(ED25519_DER_PREFIX.len() + raw.len());
    der.extend_from_slice(&ED25519_DER_PREFIX);
    der.extend_from_slice(raw);
    der
}

fn node_verification_key(der: &[u8]) -> Result<VerificationKey, AgentError> {
    match der.strip_prefix(&ED25519_DER_PREFIX[..]) {
        Some(raw) if raw.len() == 32 => {
            VerificationKey::try_from(raw).map_err(|_| AgentError::MalformedPublicKey)
        }
        _ => Err(AgentError::MalformedPublicKey),
    }
}

/// Fails with `CertificateOutdated` if any signature was made longer than `max_age` ago.
pub(crate) fn check_signature_age(
    response: &QueryResponse,
    max_age: Duration,
    clock_drift_ms: i64,
) -> Result<(), AgentError> {
    let now = OffsetDateTime::now_utc().unix_timestamp_nanos() + clock_drift_ms as i128 * 1_000_000;
    let max_age_nanos = max_age.as_nanos() as i128;
    if response
        .signatures()
        .iter()
        .any(|signature| now - signature.timestamp as i128 > max_age_nanos)
    {
        return Err(AgentError::CertificateOutdated(max_age));
    }
    Ok(())
}

/// Verifies every node signature on `response` against the node keys of `subnet`.
pub(crate) fn verify_query_signatures(
    response: &QueryResponse,
    request_id: RequestId,
    subnet: &Subnet,
) -> Result<(), AgentError> {
    let signatures = response.signatures();
    if signatures.is_empty() {
        return Err(AgentError::MissingSignature);
    }
    if signatures.len() > subnet.node_count() {
        return Err(AgentError::TooManySignatures {
            had: signatures.len(),
            needed: subnet.node_count(),
        });
    }
    for node_signature in signatures {
        let node_key = subnet
            .get_node_key(&node_signature.identity)
            .ok_or(AgentError::CertificateNotAuthorized)?;
        let key = node_verification_key(node_key)?;
        let signature = Signature::try_from(&node_signature.signature[..])
            .map_err(|_| AgentError::MalformedSignature)?;
        key.verify(
            &signature,
            &response.signable(request_id, node_signature.timestamp),
        )
        .map_err(|_| AgentError::QuerySignatureVerificationFailed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candid::Principal;
    use ed25519_consensus::SigningKey;
    use ic_request_types::{NodeSignature, RejectCode, RejectResponse, ReplyResponse};
    use std::collections::HashMap;

    fn now_nanos() -> u64 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() as u64
    }

    fn node(n: u8) -> (Principal, SigningKey) {
        (Principal::from_slice(&[n; 29]), SigningKey::from([n; 32]))
    }

    fn subnet_of(nodes: &[(Principal, SigningKey)]) -> Subnet {
        Subnet {
            id: Principal::from_slice(&[1; 29]),
            key: vec![],
            node_keys: nodes
                .iter()
                .map(|(id, key)| (*id, der_encode_ed25519_key(&key.verification_key().to_bytes())))
                .collect::<HashMap<_, _>>(),
            canister_ranges: ic_certified_tree::canister_range_set(vec![]),
        }
    }

    fn sign(
        response: QueryResponse,
        request_id: RequestId,
        signers: &[(Principal, SigningKey)],
    ) -> QueryResponse {
        let timestamp = now_nanos();
        let signatures = signers
            .iter()
            .map(|(id, key)| NodeSignature {
                timestamp,
                signature: key.sign(&response.signable(request_id, timestamp)).to_bytes().to_vec(),
                identity: *id,
            })
            .collect();
        match response {
            QueryResponse::Replied { reply, .. } => QueryResponse::Replied { reply, signatures },
            QueryResponse::Rejected { reject, .. } => QueryResponse::Rejected { reject, signatures },
        }
    }

    fn replied() -> QueryResponse {
        QueryResponse::Replied {
            reply: ReplyResponse {
                arg: b"DIDL\x00\x00".to_vec(),
            },
            signatures: vec![],
        }
    }

    #[test]
    fn accepts_signatures_from_subnet_nodes() {
        let nodes = [node(2), node(3)];
        let id = RequestId::new(&[9; 32]);
        let response = sign(replied(), id, &nodes);
        verify_query_signatures(&response, id, &subnet_of(&nodes)).unwrap();

        let rejected = sign(
            QueryResponse::Rejected {
                reject: RejectResponse {
                    reject_code: RejectCode::CanisterReject,
                    reject_message: "no".to_string(),
                    error_code: Some("IC0406".to_string()),
                },
                signatures: vec![],
            },
            id,
            &nodes[..1],
        );
        verify_query_signatures(&rejected, id, &subnet_of(&nodes)).unwrap();
    }

    #[test]
    fn tampered_signature_fails() {
        let nodes = [node(2)];
        let id = RequestId::new(&[9; 32]);
        let mut response = sign(replied(), id, &nodes);
        if let QueryResponse::Replied { signatures, .. } = &mut response {
            signatures[0].signature[0] ^= 1;
        }
        assert!(matches!(
            verify_query_signatures(&response, id, &subnet_of(&nodes)),
            Err(AgentError::QuerySignatureVerificationFailed)
        ));
    }

    #[test]
    fn signature_over_another_request_fails() {
        let nodes = [node(2)];
        let response = sign(replied(), RequestId::new(&[1; 32]), &nodes);
        assert!(matches!(
            verify_query_signatures(&response, RequestId::new(&[2; 32]), &subnet_of(&nodes)),
            Err(AgentError::QuerySignatureVerificationFailed)
        ));
    }

    #[test]
    fn signature_counts() {
        let id = RequestId::new(&[9; 32]);
        let nodes = [node(2), node(3)];
        assert!(matches!(
            verify_query_signatures(&replied(), id, &subnet_of(&nodes)),
            Err(AgentError::MissingSignature)
        ));

        let response = sign(replied(), id, &nodes);
        assert!(matches!(
            verify_query_signatures(&response, id, &subnet_of(&nodes[..1])),
            Err(AgentError::TooManySignatures { had: 2, needed: 1 })
        ));
    }

    #[test]
    fn unknown_node_is_not_authorized() {
        let id = RequestId::new(&[9; 32]);
        let response = sign(replied(), id, &[node(4)]);
        assert!(matches!(
            verify_query_signatures(&response, id, &subnet_of(&[node(2)])),
            Err(AgentError::CertificateNotAuthorized)
        ));
    }

    #[test]
    fn malformed_node_key() {
        assert!(matches!(
            node_verification_key(&[0; 44]),
            Err(AgentError::MalformedPublicKey)
        ));
        assert!(matches!(
            node_verification_key(&ED25519_DER_PREFIX),
            Err(AgentError::MalformedPublicKey)
        ));
    }

    #[test]
    fn old_signatures_are_outdated() {
        let id = RequestId::new(&[9; 32]);
        let mut response = sign(replied(), id, &[node(2)]);
        check_signature_age(&response, Duration::from_secs(300), 0).unwrap();

        if let QueryResponse::Replied { signatures, .. } = &mut response {
            signatures[0].timestamp -= 600_000_000_000;
        }
        assert!(matches!(
            check_signature_age(&response, Duration::from_secs(300), 0),
            Err(AgentError::CertificateOutdated(age)) if age == Duration::from_secs(300)
        ));
        // a replica clock ten minutes behind ours makes the same signature fresh
        check_signature_age(&response, Duration::from_secs(300), -600_000).unwrap();
    }
}
