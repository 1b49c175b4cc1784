use crate::{
    agent::{
        backoff::BackoffStrategyFactory, strategy::PollStrategyFactory, transform::RequestTransform,
        NonceFactory, Transport,
    },
    export::Principal,
    identity::{anonymous::AnonymousIdentity, Identity},
};
use ic_certified_tree::{BlsVerifier, SignatureVerifier};
use std::{sync::Arc, time::Duration};

/// The canister whose state answers the `time` reads of a clock synchronization: the ICP
/// ledger, `ryjl3-tyaaa-aaaaa-aaaba-cai`.
pub const DEFAULT_TIME_SYNC_CANISTER: Principal =
    Principal::from_slice(&[0, 0, 0, 0, 0, 0, 0, 2, 1, 1]);

/// A configuration for an agent.
///
/// Fields left at their defaults are documented on the matching
/// [`AgentBuilder`](super::AgentBuilder) method.
#[derive(Clone)]
pub struct AgentConfig {
    /// See [`with_transport`](super::AgentBuilder::with_transport).
    pub transport: Option<Arc<dyn Transport>>,
    /// See [`with_url`](super::AgentBuilder::with_url).
    pub url: Option<String>,
    /// See [`with_identity`](super::AgentBuilder::with_identity).
    pub identity: Arc<dyn Identity>,
    /// See [`with_nonce_factory`](super::AgentBuilder::with_nonce_factory).
    pub nonce_factory: NonceFactory,
    /// See [`with_query_nonces`](super::AgentBuilder::with_query_nonces).
    pub query_nonces: bool,
    /// See [`with_ingress_expiry`](super::AgentBuilder::with_ingress_expiry).
    pub ingress_expiry: Option<Duration>,
    /// See [`with_root_key`](super::AgentBuilder::with_root_key).
    pub root_key: Option<Vec<u8>>,
    /// See [`with_should_fetch_root_key`](super::AgentBuilder::with_should_fetch_root_key).
    pub should_fetch_root_key: bool,
    /// See [`with_verify_query_signatures`](super::AgentBuilder::with_verify_query_signatures).
    pub verify_query_signatures: bool,
    /// See [`with_max_retries`](super::AgentBuilder::with_max_retries).
    pub max_retries: usize,
    /// See [`with_backoff`](super::AgentBuilder::with_backoff).
    pub backoff: Option<BackoffStrategyFactory>,
    /// See [`with_poll_strategy`](super::AgentBuilder::with_poll_strategy).
    pub poll_strategy: Option<PollStrategyFactory>,
    /// See [`with_call_v3`](super::AgentBuilder::with_call_v3).
    pub use_call_v3: bool,
    /// See [`with_subnet_cache`](super::AgentBuilder::with_subnet_cache).
    pub subnet_cache_size: usize,
    /// See [`with_subnet_cache`](super::AgentBuilder::with_subnet_cache).
    pub subnet_cache_ttl: Duration,
    /// See [`with_time_sync_canister`](super::AgentBuilder::with_time_sync_canister).
    pub time_sync_canister: Principal,
    /// See [`with_certificate_verifier`](super::AgentBuilder::with_certificate_verifier).
    pub certificate_verifier: Arc<dyn SignatureVerifier>,
    /// See [`with_transform`](super::AgentBuilder::with_transform).
    pub transforms: Vec<Arc<dyn RequestTransform>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport: None,
            url: None,
            identity: Arc::new(AnonymousIdentity {}),
            nonce_factory: NonceFactory::random(),
            query_nonces: false,
            ingress_expiry: None,
            root_key: None,
            should_fetch_root_key: false,
            verify_query_signatures: true,
            max_retries: 3,
            backoff: None,
            poll_strategy: None,
            use_call_v3: true,
            subnet_cache_size: 100,
            subnet_cache_ttl: Duration::from_secs(60 * 60),
            time_sync_canister: DEFAULT_TIME_SYNC_CANISTER,
            certificate_verifier: Arc::new(BlsVerifier),
            transforms: Vec::new(),
        }
    }
}
