//! The main Agent module. Contains the [Agent] type and all associated structures.
pub(crate) mod agent_config;
pub mod agent_error;
pub mod backoff;
pub(crate) mod builder;
pub mod http_transport;
pub(crate) mod nonce;
mod polling;
pub(crate) mod query_verification;
pub(crate) mod response_authentication;
mod signed;
mod single_flight;
pub mod status;
pub mod strategy;
pub mod subnet;
pub mod transform;


pub use agent_config::{AgentConfig, DEFAULT_TIME_SYNC_CANISTER};
pub use agent_error::{AgentError, ErrorKind, HttpErrorPayload, RequestContext};
pub use builder::AgentBuilder;
#[cfg(feature = "reqwest")]
pub use http_transport::ReqwestTransport;
pub use http_transport::{AgentFuture, HttpResponse, Transport};
pub use ic_request_types::{
    signed::{SignedQuery, SignedRequestStatus, SignedUpdate},
    CallResponse, Envelope, EnvelopeContent, Expiry, QueryResponse, RejectCode, RejectResponse,
    ReplyResponse, RequestStatusResponse,
};
pub use nonce::{NonceFactory, NonceGenerator};
pub use query_verification::der_encode_ed25519_key;
pub use status::Status;
pub use subnet::Subnet;

use self::{
    backoff::{BackoffStrategyFactory, ExponentialBackoff, ExponentialBackoffOptions},
    query_verification::{check_signature_age, verify_query_signatures},
    response_authentication::{lookup_request_status, lookup_subnet, lookup_time},
    single_flight::SingleFlight,
    strategy::PollStrategyFactory,
    transform::{ExpiryTransform, NonceTransform, TransformContext, TransformPipeline},
};
use crate::{export::Principal, identity::Identity, util};
use cached::{Cached, TimedSizedCache};
use futures_util::future::{join, try_join_all};
use http::Method;
use ic_certified_tree::{Certificate, CertificateError, Label, SignatureVerifier};
use ic_request_types::{ReadStateResponse, RequestId, TransportCallResponse};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::{Duration, SystemTime},
};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// The DER-encoded root key of the Internet Computer mainnet.
const IC_ROOT_KEY: &[u8; 133] = b"\x30\x81\x82\x30\x1d\x06\x0d\x2b\x06\x01\x04\x01\x82\xdc\x7c\x05\x03\x01\x02\x01\x06\x0c\x2b\x06\x01\x04\x01\x82\xdc\x7c\x05\x03\x02\x01\x03\x61\x00\x81\x4c\x0e\x6e\xc7\x1f\xab\x58\x3b\x08\xbd\x81\x37\x3c\x25\x5c\x3c\x37\x1b\x2e\x84\x86\x3c\x98\xa4\xf1\xe0\x8b\x74\x23\x5d\x14\xfb\x5d\x9c\x0c\xd5\x46\xd9\x68\x5f\x91\x3a\x0c\x0b\x2c\xc5\x34\x15\x83\xbf\x4b\x43\x92\xe4\x67\xdb\x96\xd6\x5b\x9b\xb4\xcb\x71\x71\x12\xf8\x47\x2e\x0d\x5a\x4d\x14\x50\x5f\xfd\x74\x84\xb0\x12\x91\x09\x1c\x5f\x87\xb9\x88\x83\x46\x3f\x98\x09\x1a\x0b\xaa\xae";

const DEFAULT_INGRESS_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Bodies of 4xx responses the replica sends when a request expires too early or too late.
const INGRESS_EXPIRY_REJECTIONS: [&str; 2] = [
    "Invalid request expiry",
    "Specified ingress_expiry not within expected range",
];

/// A low level Agent to make calls to a Replica endpoint.
///
/// ```no_run
/// use ic_replica_agent::{Agent, export::Principal};
///
/// async fn total_supply() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
///   let agent = Agent::builder()
///     .with_url("https://icp-api.io")
///     .build()?;
///   let ledger = Principal::from_text("ryjl3-tyaaa-aaaaa-aaaba-cai")?;
///
///   // The argument is Candid for `()`.
///   let reply = agent.query(&ledger, "icrc1_total_supply")
///     .with_arg(b"DIDL\x00\x00".to_vec())
///     .call()
///     .await?;
///   Ok(reply)
/// }
/// ```
///
/// This agent does not understand Candid, and only acts on byte buffers.
///
/// Clones share their transport, caches and clock drift.
#[derive(Clone)]
pub struct Agent {
    identity: Arc<dyn Identity>,
    ingress_expiry: Duration,
    root_key: Arc<RwLock<Vec<u8>>>,
    fetch_root_key: Arc<AtomicBool>,
    root_key_flight: Arc<SingleFlight>,
    transport: Arc<dyn Transport>,
    verify_query_signatures: bool,
    use_call_v3: bool,
    max_retries: usize,
    backoff: BackoffStrategyFactory,
    poll_strategy: PollStrategyFactory,
    transforms: Arc<TransformPipeline>,
    clock_drift_ms: Arc<AtomicI64>,
    time_flight: Arc<SingleFlight>,
    time_sync_canister: Principal,
    subnet_cache: Arc<Mutex<TimedSizedCache<Principal, Arc<Subnet>>>>,
    subnet_flight: Arc<SingleFlight>,
    certificate_verifier: Arc<dyn SignatureVerifier>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("ingress_expiry", &self.ingress_expiry)
            .field("verify_query_signatures", &self.verify_query_signatures)
            .field("use_call_v3", &self.use_call_v3)
            .field("max_retries", &self.max_retries)
            .field("clock_drift_ms", &self.clock_drift_ms())
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

/// How the expiry of a request is chosen each time it is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngressExpiry {
    /// This long after signing, corrected by the clock drift known at that moment.
    After(Duration),
    /// A fixed point in time.
    At(Expiry),
}

impl IngressExpiry {
    fn at(self, clock_drift_ms: i64) -> Expiry {
        match self {
            IngressExpiry::After(delta) => Expiry::from_delta_with_drift(delta, clock_drift_ms),
            IngressExpiry::At(expiry) => expiry,
        }
    }
}

/// A request ready to be sent, with everything needed to report errors about it.
struct SignedContent {
    content: EnvelopeContent,
    request_id: RequestId,
    body: Vec<u8>,
    context: RequestContext,
}

impl Agent {
    /// Create an instance of an [`AgentBuilder`] for building an [`Agent`]. This is simpler than
    /// using the [`AgentConfig`] and [`Agent::new()`].
    pub fn builder() -> AgentBuilder {
        Default::default()
    }

    /// Create an instance of an [`Agent`].
    pub fn new(config: AgentConfig) -> Result<Agent, AgentError> {
        let transport: Arc<dyn Transport> = match (config.transport, config.url) {
            (Some(transport), _) => transport,
            #[cfg(feature = "reqwest")]
            (None, Some(url)) => Arc::new(ReqwestTransport::create(url)?),
            _ => return Err(AgentError::MissingReplicaTransport),
        };

        let mut transforms = TransformPipeline::new();
        transforms.add(Arc::new(ExpiryTransform));
        transforms.add(Arc::new(
            NonceTransform::new(config.nonce_factory).with_queries(config.query_nonces),
        ));
        for transform in config.transforms {
            transforms.add(transform);
        }

        let subnet_cache = TimedSizedCache::with_size_and_lifespan(
            config.subnet_cache_size.max(1),
            config.subnet_cache_ttl.as_secs().max(1),
        );

        Ok(Agent {
            identity: config.identity,
            ingress_expiry: config.ingress_expiry.unwrap_or(DEFAULT_INGRESS_EXPIRY),
            root_key: Arc::new(RwLock::new(
                config.root_key.unwrap_or_else(|| IC_ROOT_KEY.to_vec()),
            )),
            fetch_root_key: Arc::new(AtomicBool::new(config.should_fetch_root_key)),
            root_key_flight: Arc::default(),
            transport,
            verify_query_signatures: config.verify_query_signatures,
            use_call_v3: config.use_call_v3,
            max_retries: config.max_retries,
            backoff: config.backoff.unwrap_or_else(|| {
                ExponentialBackoff::factory(ExponentialBackoffOptions::default())
            }),
            poll_strategy: config
                .poll_strategy
                .unwrap_or_else(strategy::default_factory),
            transforms: Arc::new(transforms),
            clock_drift_ms: Arc::default(),
            time_flight: Arc::default(),
            time_sync_canister: config.time_sync_canister,
            subnet_cache: Arc::new(Mutex::new(subnet_cache)),
            subnet_flight: Arc::default(),
            certificate_verifier: config.certificate_verifier,
        })
    }

    /// The difference between the replica's clock and the local one, in milliseconds, as
    /// measured by the last [`sync_time`](Self::sync_time).
    pub fn clock_drift_ms(&self) -> i64 {
        self.clock_drift_ms.load(Ordering::Relaxed)
    }

    fn now_nanos(&self) -> i128 {
        OffsetDateTime::now_utc().unix_timestamp_nanos() + self.clock_drift_ms() as i128 * 1_000_000
    }

    fn sender(&self) -> Result<Principal, AgentError> {
        self.identity.sender().map_err(AgentError::SigningError)
    }

    /// Runs the transforms and signs the content. Without an explicit expiry, the request
    /// expires after the agent's default delta.
    fn sign_content(
        &self,
        mut content: EnvelopeContent,
        ingress_expiry: Option<IngressExpiry>,
    ) -> Result<SignedContent, AgentError> {
        let mut context = TransformContext {
            clock_drift_ms: self.clock_drift_ms(),
            ingress_expiry: None,
        };
        match ingress_expiry.unwrap_or(IngressExpiry::After(self.ingress_expiry)) {
            IngressExpiry::After(delta) => context.ingress_expiry = Some(delta),
            IngressExpiry::At(expiry) => content.set_ingress_expiry(expiry),
        }
        self.transforms.apply(&mut content, &context)?;

        let request_id = content.to_request_id();
        let signature = self
            .identity
            .sign(&content)
            .map_err(AgentError::SigningError)?;
        let context = RequestContext {
            request_id: Some(request_id),
            ingress_expiry: Some(content.ingress_expiry()),
            sender_pubkey: signature.public_key.clone(),
            sender_sig: signature.signature.clone(),
        };
        let envelope = Envelope {
            content,
            sender_pubkey: signature.public_key,
            sender_sig: signature.signature,
            sender_delegation: signature.delegations,
        };
        Ok(SignedContent {
            body: envelope.encode_bytes(),
            content: envelope.content,
            request_id,
            context,
        })
    }

    /// Sends one request, retrying delivery failures with the configured backoff.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, AgentError> {
        let mut backoff = (self.backoff)();
        let mut retries = 0;
        loop {
            let error = match self
                .transport
                .execute(method.clone(), path.to_string(), body.clone())
                .await
            {
                Ok(response) if response.status == 200 || response.status == 202 => {
                    return Ok(response)
                }
                Ok(response) => {
                    if response.status == 404 && path.starts_with("v3/") {
                        return Err(AgentError::V3EndpointUnsupported);
                    }
                    let error = AgentError::HttpError(HttpErrorPayload {
                        status: response.status,
                        content_type: response.content_type,
                        content: response.body,
                    });
                    if is_ingress_expiry_rejection(&error) {
                        return Err(error);
                    }
                    error
                }
                Err(error @ AgentError::ResponseSizeExceededLimit) => return Err(error),
                Err(error) => error,
            };

            let delay = if retries < self.max_retries {
                backoff.next()
            } else {
                None
            };
            let Some(delay) = delay else {
                return Err(error);
            };
            retries += 1;
            warn!(path, retries, ?delay, %error, "request to the replica failed, retrying");
            util::sleep(delay).await;
        }
    }

    /// Signs and sends `content`. If the replica rejects the expiry, the clock is synchronized
    /// once and the request is signed again, with its expiry recomputed from the new drift.
    async fn send(
        &self,
        path: &str,
        content: &EnvelopeContent,
        ingress_expiry: Option<IngressExpiry>,
    ) -> Result<(SignedContent, HttpResponse), AgentError> {
        let mut synced = false;
        loop {
            let signed = self.sign_content(content.clone(), ingress_expiry)?;
            match self
                .execute(Method::POST, path, Some(signed.body.clone()))
                .await
            {
                Ok(response) => return Ok((signed, response)),
                Err(error) if !synced && is_ingress_expiry_rejection(&error) => {
                    warn!(request_id = %signed.request_id, %error, "replica rejected the ingress expiry, synchronizing the clock");
                    self.sync_time(None)
                        .await
                        .map_err(|e| e.with_context(signed.context.clone()))?;
                    synced = true;
                }
                Err(error) => return Err(error.with_context(signed.context)),
            }
        }
    }

    /// Fetch the root key of the replica using its status end point, and update the agent's
    /// root key. This only uses the agent's specific upstream replica, and does not ensure
    /// the root key validity. In order to prevent any MITM attack, developers should try
    /// to contact multiple replicas.
    ///
    /// The root key is necessary for validating state and certificates sent by the replica.
    /// By default, it is set to the mainnet key; only call this for local replicas.
    pub async fn fetch_root_key(&self) -> Result<(), AgentError> {
        let status = self.status().await?;
        let root_key = status
            .root_key
            .clone()
            .ok_or(AgentError::NoRootKeyInStatus(status))?;
        self.set_root_key(root_key);
        Ok(())
    }

    /// By default, the agent is configured to talk to the main Internet Computer, and verifies
    /// responses using a hard-coded public key.
    ///
    /// Using this function you can set the root key to a known one if you know if beforehand.
    pub fn set_root_key(&self, root_key: Vec<u8>) {
        *self.root_key.write().unwrap_or_else(PoisonError::into_inner) = root_key;
        self.fetch_root_key.store(false, Ordering::Release);
    }

    /// Return the root key currently in use.
    pub fn read_root_key(&self) -> Result<Vec<u8>, AgentError> {
        self.root_key
            .read()
            .map(|key| key.clone())
            .map_err(|_| AgentError::CouldNotReadRootKey)
    }

    async fn fetch_root_key_if_needed(&self) -> Result<(), AgentError> {
        if !self.fetch_root_key.load(Ordering::Acquire) {
            return Ok(());
        }
        let seen = self.root_key_flight.completed();
        self.root_key_flight
            .run(seen, || async {
                if self.fetch_root_key.load(Ordering::Acquire) {
                    self.fetch_root_key().await?;
                    debug!("fetched the root key from the replica");
                }
                Ok(())
            })
            .await
    }

    /// Returns the status of the replica.
    pub async fn status(&self) -> Result<Status, AgentError> {
        let response = self.execute(Method::GET, "v2/status", None).await?;
        let cbor: serde_cbor::Value = serde_cbor::from_slice(&response.body)?;
        Status::try_from(&cbor).map_err(|_| AgentError::InvalidReplicaStatus)
    }

    /// Measures the drift between the replica's clock and the local one by reading the
    /// certified time of `canister_id` (by default, [`DEFAULT_TIME_SYNC_CANISTER`]) three
    /// times. Every expiry built afterwards is corrected by it.
    pub async fn sync_time(&self, canister_id: Option<Principal>) -> Result<(), AgentError> {
        let canister_id = canister_id.unwrap_or(self.time_sync_canister);
        self.fetch_root_key_if_needed().await?;
        let seen = self.time_flight.completed();
        self.time_flight
            .run(seen, || async {
                let times = try_join_all((0..3).map(|_| self.read_time(canister_id))).await?;
                let replica_ms = times.into_iter().max().unwrap_or_default() as i128 / 1_000_000;
                let local_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
                let drift = i64::try_from(replica_ms - local_ms).unwrap_or_default();
                self.clock_drift_ms.store(drift, Ordering::Relaxed);
                debug!(%canister_id, clock_drift_ms = drift, "synchronized the clock with the replica");
                Ok(())
            })
            .await
    }

    /// Reads the certified time of a canister's subnet. The certificate is not checked for
    /// freshness, since the local clock is what is in question.
    async fn read_time(&self, canister_id: Principal) -> Result<u64, AgentError> {
        let content = self.read_state_content(vec![vec!["time".into()]])?;
        let signed = self.sign_content(content, None)?;
        let path = format!("v2/canister/{}/read_state", canister_id.to_text());
        let response = self
            .execute(Method::POST, &path, Some(signed.body))
            .await
            .map_err(|e| e.with_context(signed.context.clone()))?;
        let certificate = self
            .read_certificate(&response.body, canister_id, false)
            .map_err(|e| e.with_context(signed.context))?;
        lookup_time(&certificate)
    }

    fn read_state_content(&self, paths: Vec<Vec<Label>>) -> Result<EnvelopeContent, AgentError> {
        Ok(EnvelopeContent::ReadState {
            ingress_expiry: Expiry::from_nanos(0),
            sender: self.sender()?,
            paths,
        })
    }

    /// Decodes and verifies the certificate of a `read_state` response.
    fn read_certificate(
        &self,
        body: &[u8],
        effective_canister_id: Principal,
        check_freshness: bool,
    ) -> Result<Certificate, AgentError> {
        let response: ReadStateResponse = serde_cbor::from_slice(body)?;
        let certificate = Certificate::from_cbor(&response.certificate)?;
        self.verify_certificate(&certificate, effective_canister_id)?;
        if check_freshness {
            self.check_certificate_freshness(&certificate)?;
        }
        Ok(certificate)
    }

    /// Verify a certificate, checking delegation if present.
    /// Only passes if the certificate also has authority over the canister.
    pub fn verify_certificate(
        &self,
        certificate: &Certificate,
        effective_canister_id: Principal,
    ) -> Result<(), AgentError> {
        let root_key = self.read_root_key()?;
        match certificate.verify(
            effective_canister_id,
            &root_key,
            &*self.certificate_verifier,
        ) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AgentError::CertificateVerificationFailed),
            Err(CertificateError::NotAuthorized(_)) => Err(AgentError::CertificateNotAuthorized),
            Err(error) => Err(error.into()),
        }
    }

    fn check_certificate_freshness(&self, certificate: &Certificate) -> Result<(), AgentError> {
        let time = lookup_time(certificate)?;
        if self.now_nanos() - time as i128 > self.ingress_expiry.as_nanos() as i128 {
            Err(AgentError::CertificateOutdated(self.ingress_expiry))
        } else {
            Ok(())
        }
    }

    /// Request the raw state of a canister's subnet. The certificate is verified against the
    /// root key and must be recent.
    pub async fn read_state_raw(
        &self,
        paths: Vec<Vec<Label>>,
        effective_canister_id: Principal,
    ) -> Result<Certificate, AgentError> {
        self.fetch_root_key_if_needed().await?;
        let content = self.read_state_content(paths)?;
        let path = format!("v2/canister/{}/read_state", effective_canister_id.to_text());
        let (signed, response) = self.send(&path, &content, None).await?;
        self.read_certificate(&response.body, effective_canister_id, true)
            .map_err(|e| e.with_context(signed.context))
    }

    /// Reads the status of a call, and the certificate it was read from.
    pub async fn request_status_raw(
        &self,
        request_id: &RequestId,
        effective_canister_id: Principal,
    ) -> Result<(RequestStatusResponse, Certificate), AgentError> {
        let paths = vec![vec!["request_status".into(), request_id.to_vec().into()]];
        let certificate = self.read_state_raw(paths, effective_canister_id).await?;
        let status = lookup_request_status(&certificate, request_id)?;
        Ok((status, certificate))
    }

    /// Reads the subnet of a canister from the replica, bypassing the cache.
    pub async fn fetch_subnet_by_canister(&self, canister: &Principal) -> Result<Subnet, AgentError> {
        let certificate = self
            .read_state_raw(vec![vec!["subnet".into()]], *canister)
            .await?;
        lookup_subnet(&certificate, &self.read_root_key()?)
    }

    /// Returns the subnet of a canister, from the cache when possible. Concurrent callers
    /// missing the cache share one fetch.
    pub async fn get_subnet_by_canister(
        &self,
        canister: &Principal,
    ) -> Result<Arc<Subnet>, AgentError> {
        if let Some(subnet) = self.cached_subnet(canister) {
            return Ok(subnet);
        }
        let seen = self.subnet_flight.completed();
        self.subnet_flight
            .run(seen, || async {
                if self.cached_subnet(canister).is_none() {
                    self.refresh_subnet(canister).await?;
                }
                Ok(())
            })
            .await?;
        // Another caller's refresh may have been for a different canister.
        match self.cached_subnet(canister) {
            Some(subnet) => Ok(subnet),
            None => self.refresh_subnet(canister).await,
        }
    }

    async fn refresh_subnet(&self, canister: &Principal) -> Result<Arc<Subnet>, AgentError> {
        let subnet = Arc::new(self.fetch_subnet_by_canister(canister).await?);
        debug!(%canister, subnet_id = %subnet.id(), nodes = subnet.node_count(), "fetched subnet");
        self.subnet_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_set(*canister, subnet.clone());
        Ok(subnet)
    }

    fn cached_subnet(&self, canister: &Principal) -> Option<Arc<Subnet>> {
        self.subnet_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_get(canister)
            .cloned()
    }

    fn evict_subnet(&self, canister: &Principal) {
        self.subnet_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_remove(canister);
    }

    /// Checks the node signatures of a query response. A failure refreshes the subnet once
    /// before it is reported.
    async fn verify_query_response(
        &self,
        response: &QueryResponse,
        request_id: RequestId,
        subnet: Arc<Subnet>,
        effective_canister_id: Principal,
    ) -> Result<(), AgentError> {
        check_signature_age(response, self.ingress_expiry, self.clock_drift_ms())?;
        if let Err(error) = verify_query_signatures(response, request_id, &subnet) {
            warn!(%effective_canister_id, %error, "query signature verification failed, refreshing the subnet");
            self.evict_subnet(&effective_canister_id);
            let subnet = self.get_subnet_by_canister(&effective_canister_id).await?;
            verify_query_signatures(response, request_id, &subnet)?;
        }
        Ok(())
    }

    async fn query_raw(
        &self,
        canister_id: Principal,
        effective_canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        ingress_expiry: Option<IngressExpiry>,
    ) -> Result<Vec<u8>, AgentError> {
        let content = EnvelopeContent::Query {
            ingress_expiry: Expiry::from_nanos(0),
            sender: self.sender()?,
            canister_id,
            method_name,
            arg,
            nonce: None,
        };
        let path = format!("v2/canister/{}/query", effective_canister_id.to_text());
        let mut fresh_queries = 0;
        loop {
            match self
                .query_once(&path, &content, ingress_expiry, effective_canister_id)
                .await
            {
                Err(error)
                    if matches!(error.without_context(), AgentError::CertificateOutdated(_))
                        && fresh_queries < self.max_retries =>
                {
                    fresh_queries += 1;
                    warn!(%effective_canister_id, fresh_queries, "query signatures are outdated, querying again");
                }
                result => return result,
            }
        }
    }

    async fn query_once(
        &self,
        path: &str,
        content: &EnvelopeContent,
        ingress_expiry: Option<IngressExpiry>,
        effective_canister_id: Principal,
    ) -> Result<Vec<u8>, AgentError> {
        let (signed, response) = if self.verify_query_signatures {
            let (sent, subnet) = join(
                self.send(path, content, ingress_expiry),
                self.get_subnet_by_canister(&effective_canister_id),
            )
            .await;
            let (signed, response) = sent?;
            let request_id = signed.request_id;
            let checked = async {
                let response: QueryResponse = serde_cbor::from_slice(&response.body)?;
                self.verify_query_response(
                    &response,
                    request_id,
                    subnet?,
                    effective_canister_id,
                )
                .await?;
                Ok::<_, AgentError>(response)
            };
            match checked.await {
                Ok(response) => (signed, response),
                Err(error) => return Err(error.with_context(signed.context)),
            }
        } else {
            let (signed, response) = self.send(path, content, ingress_expiry).await?;
            match serde_cbor::from_slice(&response.body) {
                Ok(response) => (signed, response),
                Err(error) => return Err(AgentError::from(error).with_context(signed.context)),
            }
        };
        query_reply(response).map_err(|e| e.with_context(signed.context))
    }

    async fn update_raw(
        &self,
        canister_id: Principal,
        effective_canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        ingress_expiry: Option<IngressExpiry>,
    ) -> Result<CallResponse<(Vec<u8>, Certificate)>, AgentError> {
        let content = EnvelopeContent::Call {
            nonce: None,
            ingress_expiry: Expiry::from_nanos(0),
            sender: self.sender()?,
            canister_id,
            method_name,
            arg,
        };
        if self.use_call_v3 {
            let path = format!("v3/canister/{}/call", effective_canister_id.to_text());
            match self.send(&path, &content, ingress_expiry).await {
                Ok((signed, response)) => {
                    return self
                        .read_call_response(signed.request_id, effective_canister_id, response, true)
                        .map_err(|e| e.with_context(signed.context))
                }
                Err(error) if matches!(error.without_context(), AgentError::V3EndpointUnsupported) => {
                    warn!(%effective_canister_id, "the replica has no v3 call endpoint, falling back to v2");
                }
                Err(error) => return Err(error),
            }
        }
        let path = format!("v2/canister/{}/call", effective_canister_id.to_text());
        let (signed, response) = self.send(&path, &content, ingress_expiry).await?;
        self.read_call_response(signed.request_id, effective_canister_id, response, false)
            .map_err(|e| e.with_context(signed.context))
    }

    /// Interprets the answer to a call. `v3` tells which endpoint gave it.
    fn read_call_response(
        &self,
        request_id: RequestId,
        effective_canister_id: Principal,
        response: HttpResponse,
        v3: bool,
    ) -> Result<CallResponse<(Vec<u8>, Certificate)>, AgentError> {
        if response.status == 202 {
            return Ok(CallResponse::Poll(request_id));
        }
        if !v3 {
            // The v2 endpoint only answers 200 to reject a call outright.
            let reject: RejectResponse = serde_cbor::from_slice(&response.body)?;
            return Err(AgentError::UncertifiedReject(reject));
        }
        match serde_cbor::from_slice::<TransportCallResponse>(&response.body)? {
            TransportCallResponse::Accepted => Ok(CallResponse::Poll(request_id)),
            TransportCallResponse::NonReplicatedRejection(reject) => {
                Err(AgentError::UncertifiedReject(reject))
            }
            TransportCallResponse::Replied { certificate } => {
                let certificate = Certificate::from_cbor(&certificate)?;
                self.verify_certificate(&certificate, effective_canister_id)?;
                self.check_certificate_freshness(&certificate)?;
                match lookup_request_status(&certificate, &request_id)? {
                    RequestStatusResponse::Replied(ReplyResponse { arg }) => {
                        Ok(CallResponse::Response((arg, certificate)))
                    }
                    RequestStatusResponse::Rejected(reject) => {
                        Err(AgentError::CertifiedReject(reject))
                    }
                    RequestStatusResponse::Done => Err(AgentError::RequestStatusDoneNoReply(
                        String::from(request_id),
                    )),
                    RequestStatusResponse::Unknown
                    | RequestStatusResponse::Received
                    | RequestStatusResponse::Processing => Ok(CallResponse::Poll(request_id)),
                }
            }
        }
    }

    /// Returns an UpdateBuilder enabling the construction of an update call without
    /// passing all arguments.
    pub fn update<S: Into<String>>(&self, canister_id: &Principal, method_name: S) -> UpdateBuilder {
        UpdateBuilder::new(self, *canister_id, method_name.into())
    }

    /// Returns a QueryBuilder enabling the construction of a query call without
    /// passing all arguments.
    pub fn query<S: Into<String>>(&self, canister_id: &Principal, method_name: S) -> QueryBuilder {
        QueryBuilder::new(self, *canister_id, method_name.into())
    }
}

fn is_ingress_expiry_rejection(error: &AgentError) -> bool {
    match error.without_context() {
        AgentError::HttpError(payload) if (400..500).contains(&payload.status) => {
            INGRESS_EXPIRY_REJECTIONS
                .iter()
                .any(|prefix| payload.content.starts_with(prefix.as_bytes()))
        }
        _ => false,
    }
}

fn query_reply(response: QueryResponse) -> Result<Vec<u8>, AgentError> {
    match response {
        QueryResponse::Replied { reply, .. } => Ok(reply.arg),
        QueryResponse::Rejected { reject, .. } => Err(AgentError::UncertifiedReject(reject)),
    }
}

fn expiry_at(time: SystemTime) -> Expiry {
    Expiry::from_nanos(
        time.duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |since| since.as_nanos() as u64),
    )
}

/// A Query Request Builder.
///
/// This makes it easier to do query calls without actually passing all arguments.
#[derive(Debug, Clone)]
pub struct QueryBuilder<'agent> {
    agent: &'agent Agent,
    effective_canister_id: Principal,
    canister_id: Principal,
    method_name: String,
    arg: Vec<u8>,
    ingress_expiry: Option<IngressExpiry>,
}

impl<'agent> QueryBuilder<'agent> {
    /// Creates a new query builder with an agent for a particular canister method.
    pub fn new(agent: &'agent Agent, canister_id: Principal, method_name: String) -> Self {
        Self {
            agent,
            effective_canister_id: canister_id,
            canister_id,
            method_name,
            arg: vec![],
            ingress_expiry: None,
        }
    }

    /// Sets the effective canister ID of the destination. Defaults to the canister itself.
    pub fn with_effective_canister_id(mut self, canister_id: Principal) -> Self {
        self.effective_canister_id = canister_id;
        self
    }

    /// Sets the argument blob to pass to the canister. For most canisters this should be a Candid-serialized tuple.
    pub fn with_arg<A: Into<Vec<u8>>>(mut self, arg: A) -> Self {
        self.arg = arg.into();
        self
    }

    /// Sets `ingress_expiry` to the provided timestamp, at nanosecond precision.
    pub fn expire_at(mut self, time: SystemTime) -> Self {
        self.ingress_expiry = Some(IngressExpiry::At(expiry_at(time)));
        self
    }

    /// Sets `ingress_expiry` to `duration` after the request is signed, corrected by the
    /// agent's clock drift at that moment.
    pub fn expire_after(mut self, duration: Duration) -> Self {
        self.ingress_expiry = Some(IngressExpiry::After(duration));
        self
    }

    /// Make a query call. This will return a byte vector.
    pub async fn call(self) -> Result<Vec<u8>, AgentError> {
        self.agent
            .query_raw(
                self.canister_id,
                self.effective_canister_id,
                self.method_name,
                self.arg,
                self.ingress_expiry,
            )
            .await
    }

    /// Sign a query call. The result can be submitted later with [`Agent::query_signed`].
    pub fn sign(self) -> Result<SignedQuery, AgentError> {
        self.agent.sign_query(
            self.canister_id,
            self.effective_canister_id,
            self.method_name,
            self.arg,
            self.ingress_expiry
                .map(|expiry| expiry.at(self.agent.clock_drift_ms())),
        )
    }
}

/// An Update Request Builder.
///
/// This makes it easier to do update calls without actually passing all arguments or specifying
/// if you want to wait or not.
#[derive(Debug, Clone)]
pub struct UpdateBuilder<'agent> {
    agent: &'agent Agent,
    effective_canister_id: Principal,
    canister_id: Principal,
    method_name: String,
    arg: Vec<u8>,
    ingress_expiry: Option<IngressExpiry>,
}

impl<'agent> UpdateBuilder<'agent> {
    /// Creates a new update builder with an agent for a particular canister method.
    pub fn new(agent: &'agent Agent, canister_id: Principal, method_name: String) -> Self {
        Self {
            agent,
            effective_canister_id: canister_id,
            canister_id,
            method_name,
            arg: vec![],
            ingress_expiry: None,
        }
    }

    /// Sets the effective canister ID of the destination. Defaults to the canister itself.
    pub fn with_effective_canister_id(mut self, canister_id: Principal) -> Self {
        self.effective_canister_id = canister_id;
        self
    }

    /// Sets the argument blob to pass to the canister. For most canisters this should be a Candid-serialized tuple.
    pub fn with_arg<A: Into<Vec<u8>>>(mut self, arg: A) -> Self {
        self.arg = arg.into();
        self
    }

    /// Sets `ingress_expiry` to the provided timestamp, at nanosecond precision.
    pub fn expire_at(mut self, time: SystemTime) -> Self {
        self.ingress_expiry = Some(IngressExpiry::At(expiry_at(time)));
        self
    }

    /// Sets `ingress_expiry` to `duration` after the request is signed, corrected by the
    /// agent's clock drift at that moment.
    pub fn expire_after(mut self, duration: Duration) -> Self {
        self.ingress_expiry = Some(IngressExpiry::After(duration));
        self
    }

    /// Make an update call. A replica answering synchronously gives the reply directly;
    /// otherwise the returned request id can be passed to [`Agent::wait`].
    pub async fn call(self) -> Result<CallResponse<Vec<u8>>, AgentError> {
        let response = self
            .agent
            .update_raw(
                self.canister_id,
                self.effective_canister_id,
                self.method_name,
                self.arg,
                self.ingress_expiry,
            )
            .await?;
        Ok(response.map(|(reply, _)| reply))
    }

    /// Make an update call and poll until it completes.
    pub async fn call_and_wait(self) -> Result<Vec<u8>, AgentError> {
        let agent = self.agent;
        let effective_canister_id = self.effective_canister_id;
        match self.call().await? {
            CallResponse::Response(reply) => Ok(reply),
            CallResponse::Poll(request_id) => agent.wait(&request_id, effective_canister_id).await,
        }
    }

    /// Sign an update call. The result can be submitted later with [`Agent::update_signed`].
    pub fn sign(self) -> Result<SignedUpdate, AgentError> {
        self.agent.sign_update(
            self.canister_id,
            self.effective_canister_id,
            self.method_name,
            self.arg,
            self.ingress_expiry
                .map(|expiry| expiry.at(self.agent.clock_drift_ms())),
        )
    }
}
