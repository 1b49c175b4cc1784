//! The `ic-replica-agent` is a low-level client for the HTTP interface of an Internet Computer
//! replica. It signs requests with an [`Identity`], sends them through a [`Transport`](agent::Transport),
//! and only hands back answers it could authenticate: certified state is checked against the
//! root key, and query replies against the signatures of the nodes of the canister's subnet.
//!
//! ## Overview
//! An [`Agent`] makes three kinds of requests:
//!
//! - update calls, which go through consensus. The replica may answer synchronously with a
//!   certificate, or the agent polls the call's status until it completes;
//! - queries, answered by a single node and signed by it;
//! - `read_state` requests, returning a [`Certificate`] over part of the replicated state.
//!
//! Transient failures are retried with a backoff, and a replica rejecting a request's expiry
//! makes the agent measure its clock drift and sign the request again.
//!
//! ## Example
//! ```no_run
//! use ic_replica_agent::{export::Principal, Agent};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = Agent::builder()
//!     .with_url("http://localhost:4943")
//!     .with_should_fetch_root_key(true)
//!     .build()?;
//! let canister_id = Principal::from_text("rrkah-fqaaa-aaaaa-aaaaq-cai")?;
//! let reply = agent
//!     .update(&canister_id, "greet")
//!     .with_arg(b"DIDL\x00\x01\x71\x05world".to_vec())
//!     .call_and_wait()
//!     .await?;
//! println!("{}", hex::encode(reply));
//! # Ok(())
//! # }
//! ```
//!
//! This crate does not understand Candid; arguments and replies are byte buffers.

#![warn(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![warn(clippy::future_not_send)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod util;

pub mod agent;
pub mod export;
pub mod identity;

#[doc(inline)]
pub use agent::{agent_error, agent_error::AgentError, Agent, NonceFactory, NonceGenerator};
#[doc(inline)]
pub use ic_request_types::{to_request_id, RequestId, RequestIdError, TransportCallResponse};
#[doc(inline)]
pub use identity::{Identity, Signature};

pub use ic_certified_tree::{hash_tree, Certificate};

/// Looks up a value in the certificate's tree at the specified path.
///
/// Returns the value if it was found; otherwise, errors with `LookupPathAbsent`.
pub fn lookup_value<'c>(certificate: &'c Certificate, path: &[&[u8]]) -> Result<&'c [u8], AgentError> {
    agent::response_authentication::lookup_value(&certificate.tree, path)
}
