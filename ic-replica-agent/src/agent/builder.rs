use crate::{
    agent::{
        backoff::BackoffStrategyFactory, strategy::PollStrategyFactory, transform::RequestTransform,
        AgentConfig, Transport,
    },
    export::Principal,
    Agent, AgentError, Identity, NonceFactory,
};
use ic_certified_tree::SignatureVerifier;
use std::{sync::Arc, time::Duration};

/// A builder for an [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    config: AgentConfig,
}

impl AgentBuilder {
    /// Create an instance of [Agent] with the information from this builder.
    pub fn build(self) -> Result<Agent, AgentError> {
        Agent::new(self.config)
    }

    /// Set the URL of the [Agent]. A [`ReqwestTransport`](super::http_transport::ReqwestTransport)
    /// is created for it when the agent is built, unless a transport is set.
    pub fn with_url<S: Into<String>>(self, url: S) -> Self {
        AgentBuilder {
            config: AgentConfig {
                url: Some(url.into()),
                ..self.config
            },
        }
    }

    /// Set a transport for the [Agent]. It takes precedence over [`with_url`](Self::with_url).
    pub fn with_transport<T: 'static + Transport>(self, transport: T) -> Self {
        self.with_arc_transport(Arc::new(transport))
    }

    /// Same as [`with_transport`](Self::with_transport), but provides an `Arc` instead.
    pub fn with_arc_transport(self, transport: Arc<dyn Transport>) -> Self {
        AgentBuilder {
            config: AgentConfig {
                transport: Some(transport),
                ..self.config
            },
        }
    }

    /// Add a NonceFactory to this Agent. By default, random 16-byte nonces are produced.
    pub fn with_nonce_factory(self, nonce_factory: NonceFactory) -> Self {
        AgentBuilder {
            config: AgentConfig {
                nonce_factory,
                ..self.config
            },
        }
    }

    /// Also put nonces on queries. Off by default, as a nonce defeats query response caching.
    pub fn with_query_nonces(self, query_nonces: bool) -> Self {
        AgentBuilder {
            config: AgentConfig {
                query_nonces,
                ..self.config
            },
        }
    }

    /// Add an identity provider for signing messages. By default, requests are anonymous.
    pub fn with_identity<I>(self, identity: I) -> Self
    where
        I: 'static + Identity,
    {
        self.with_arc_identity(Arc::new(identity))
    }

    /// Same as [`with_identity`](Self::with_identity), but provides a boxed implementation instead
    /// of a direct type.
    pub fn with_boxed_identity(self, identity: Box<dyn Identity>) -> Self {
        self.with_arc_identity(Arc::from(identity))
    }

    /// Same as [`with_identity`](Self::with_identity), but provides a shared implementation.
    pub fn with_arc_identity(self, identity: Arc<dyn Identity>) -> Self {
        AgentBuilder {
            config: AgentConfig {
                identity,
                ..self.config
            },
        }
    }

    /// Provides a _default_ ingress expiry. This is the delta that will be applied
    /// at the time an update or query is made. The default expiry cannot be a
    /// fixed system time. It also bounds the age of certificates and query signatures.
    /// Defaults to five minutes.
    pub fn with_ingress_expiry(self, ingress_expiry: Option<Duration>) -> Self {
        AgentBuilder {
            config: AgentConfig {
                ingress_expiry,
                ..self.config
            },
        }
    }

    /// Sets the DER-encoded root key that certificates are checked against. Defaults to the
    /// mainnet key.
    pub fn with_root_key(self, root_key: Vec<u8>) -> Self {
        AgentBuilder {
            config: AgentConfig {
                root_key: Some(root_key),
                ..self.config
            },
        }
    }

    /// Fetch the root key from the replica before the first request that needs it. Only use
    /// this with a local replica: the fetched key is not authenticated.
    pub fn with_should_fetch_root_key(self, should_fetch_root_key: bool) -> Self {
        AgentBuilder {
            config: AgentConfig {
                should_fetch_root_key,
                ..self.config
            },
        }
    }

    /// Whether node signatures on query responses are checked. On by default.
    pub fn with_verify_query_signatures(self, verify_query_signatures: bool) -> Self {
        AgentBuilder {
            config: AgentConfig {
                verify_query_signatures,
                ..self.config
            },
        }
    }

    /// How many times a failed HTTP request is retried, and how many fresh queries are made
    /// when query signatures are too old. Defaults to 3.
    pub fn with_max_retries(self, max_retries: usize) -> Self {
        AgentBuilder {
            config: AgentConfig {
                max_retries,
                ..self.config
            },
        }
    }

    /// Sets the delays between retries. Defaults to an
    /// [`ExponentialBackoff`](super::backoff::ExponentialBackoff) with its default options.
    pub fn with_backoff(self, backoff: BackoffStrategyFactory) -> Self {
        AgentBuilder {
            config: AgentConfig {
                backoff: Some(backoff),
                ..self.config
            },
        }
    }

    /// Sets how calls are polled. Defaults to
    /// [`default_strategy`](super::strategy::default_strategy).
    pub fn with_poll_strategy(self, poll_strategy: PollStrategyFactory) -> Self {
        AgentBuilder {
            config: AgentConfig {
                poll_strategy: Some(poll_strategy),
                ..self.config
            },
        }
    }

    /// Whether calls go to the synchronous v3 endpoint first. On by default; a replica
    /// answering 404 there gets the call on the v2 endpoint instead.
    pub fn with_call_v3(self, use_call_v3: bool) -> Self {
        AgentBuilder {
            config: AgentConfig {
                use_call_v3,
                ..self.config
            },
        }
    }

    /// Sets the capacity and entry lifetime of the subnet cache used to check query signatures.
    /// Defaults to 100 entries kept for an hour.
    pub fn with_subnet_cache(self, size: usize, ttl: Duration) -> Self {
        AgentBuilder {
            config: AgentConfig {
                subnet_cache_size: size,
                subnet_cache_ttl: ttl,
                ..self.config
            },
        }
    }

    /// Sets the canister whose certified time is read to synchronize clocks.
    pub fn with_time_sync_canister(self, canister_id: Principal) -> Self {
        AgentBuilder {
            config: AgentConfig {
                time_sync_canister: canister_id,
                ..self.config
            },
        }
    }

    /// Replaces the BLS verifier used for certificates.
    pub fn with_certificate_verifier<V: 'static + SignatureVerifier>(self, verifier: V) -> Self {
        AgentBuilder {
            config: AgentConfig {
                certificate_verifier: Arc::new(verifier),
                ..self.config
            },
        }
    }

    /// Adds a transform run on every request before it is signed.
    pub fn with_transform<T: 'static + RequestTransform>(mut self, transform: T) -> Self {
        self.config.transforms.push(Arc::new(transform));
        self
    }
}
