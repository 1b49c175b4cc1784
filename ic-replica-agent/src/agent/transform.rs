//! Adjustments applied to every request between its construction and its signature.

use crate::agent::{AgentError, NonceFactory};
use ic_request_types::{EnvelopeContent, Expiry};
use std::{fmt, sync::Arc, time::Duration};

/// What a transform may know about the agent running it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformContext {
    /// The difference between the replica's clock and the local one, in milliseconds.
    pub clock_drift_ms: i64,
    /// How far in the future the request should expire. `None` when the caller fixed the
    /// expiry to a point in time.
    pub ingress_expiry: Option<Duration>,
}

/// A step run on each outgoing request before it is signed.
pub trait RequestTransform: Send + Sync {
    /// Transforms run from the highest priority to the lowest. Transforms with the same
    /// priority run in the order they were added.
    fn priority(&self) -> i32 {
        0
    }

    /// Modifies the request in place.
    fn transform(
        &self,
        content: &mut EnvelopeContent,
        context: &TransformContext,
    ) -> Result<(), AgentError>;
}

/// An ordered list of [`RequestTransform`]s.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    transforms: Vec<Arc<dyn RequestTransform>>,
}

impl TransformPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transform, keeping the pipeline sorted by descending priority.
    pub fn add(&mut self, transform: Arc<dyn RequestTransform>) {
        let priority = transform.priority();
        let at = self
            .transforms
            .iter()
            .position(|t| t.priority() < priority)
            .unwrap_or(self.transforms.len());
        self.transforms.insert(at, transform);
    }

    /// Runs every transform over `content`, stopping at the first error.
    pub fn apply(
        &self,
        content: &mut EnvelopeContent,
        context: &TransformContext,
    ) -> Result<(), AgentError> {
        for transform in &self.transforms {
            transform.transform(content, context)?;
        }
        Ok(())
    }

    /// The number of transforms.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the pipeline has no transforms.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("len", &self.transforms.len())
            .finish()
    }
}

/// Fills in the nonce of calls that do not carry one yet.
///
/// Queries only get a nonce when configured with [`with_queries`](Self::with_queries):
/// a nonce makes otherwise identical queries distinct, which defeats response caching.
#[derive(Debug, Clone)]
pub struct NonceTransform {
    factory: NonceFactory,
    include_queries: bool,
}

impl NonceTransform {
    /// A transform adding nonces from `factory` to calls.
    pub fn new(factory: NonceFactory) -> Self {
        Self {
            factory,
            include_queries: false,
        }
    }

    /// Also add nonces to queries.
    pub fn with_queries(self, include_queries: bool) -> Self {
        Self {
            include_queries,
            ..self
        }
    }
}

impl RequestTransform for NonceTransform {
    fn priority(&self) -> i32 {
        1
    }

    fn transform(&self, content: &mut EnvelopeContent, _: &TransformContext) -> Result<(), AgentError> {
        let applies = match content {
            EnvelopeContent::Call { .. } => true,
            EnvelopeContent::Query { .. } => self.include_queries,
            EnvelopeContent::ReadState { .. } => false,
        };
        if applies {
            if let Some(nonce) = content.nonce_mut() {
                if nonce.is_none() {
                    *nonce = self.factory.generate();
                }
            }
        }
        Ok(())
    }
}

/// Sets the expiry of each request to [`ingress_expiry`](TransformContext::ingress_expiry)
/// from now, corrected by the agent's clock drift. Requests with a fixed expiry are left alone.
///
/// Every agent runs it first, so that later transforms see and may replace the expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiryTransform;

impl RequestTransform for ExpiryTransform {
    fn priority(&self) -> i32 {
        2
    }

    fn transform(
        &self,
        content: &mut EnvelopeContent,
        context: &TransformContext,
    ) -> Result<(), AgentError> {
        if let Some(delta) = context.ingress_expiry {
            content.set_ingress_expiry(Expiry::from_delta_with_drift(
                delta,
                context.clock_drift_ms,
            ));
        }
        Ok(())
    }
}
