//! Strategies deciding how long to wait between two request status polls, and when to give up.
//!
//! A strategy is created fresh for every call being polled, through a
//! [`PollStrategyFactory`]. Strategies compose with [`chain`]:
//!
//! ```
//! use ic_replica_agent::agent::strategy::{chain, throttle, timeout};
//! use std::time::Duration;
//!
//! let strategy = chain(vec![
//!     Box::new(throttle(Duration::from_millis(500))),
//!     Box::new(timeout(Duration::from_secs(60))),
//! ]);
//! # let _ = strategy;
//! ```

use crate::agent::{
    backoff::{BackoffStrategy, ExponentialBackoff, ExponentialBackoffOptions},
    AgentError,
};
use ic_request_types::RequestStatusResponse;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Decides the wait before the next poll, given the last status seen.
pub trait PollStrategy: Send {
    /// The delay before polling again. An error stops polling and is returned to the caller.
    fn next(&mut self, status: &RequestStatusResponse) -> Result<Duration, AgentError>;
}

impl<S: PollStrategy + ?Sized> PollStrategy for Box<S> {
    fn next(&mut self, status: &RequestStatusResponse) -> Result<Duration, AgentError> {
        (**self).next(status)
    }
}

/// Creates a fresh [`PollStrategy`] for each polled call.
pub type PollStrategyFactory = Arc<dyn Fn() -> Box<dyn PollStrategy> + Send + Sync>;

/// The strategy used when none is configured: wait one extra second before the second
/// poll, then back off exponentially from one second by a factor of 1.2 up to ten
/// seconds, and give up after five minutes.
pub fn default_strategy() -> Box<dyn PollStrategy> {
    Box::new(chain(vec![
        Box::new(conditional_delay(once(), Duration::from_secs(1))),
        Box::new(backoff(ExponentialBackoff::new(ExponentialBackoffOptions {
            initial_interval: Duration::from_secs(1),
            multiplier: 1.2,
            max_interval: Duration::from_secs(10),
            randomization_factor: 0.0,
            max_iterations: None,
            max_elapsed_time: None,
        }))),
        Box::new(timeout(Duration::from_secs(5 * 60))),
    ]))
}

/// A [`PollStrategyFactory`] for [`default_strategy`].
pub fn default_factory() -> PollStrategyFactory {
    Arc::new(default_strategy)
}

/// A predicate that holds the first time it is asked, and never again.
pub fn once() -> impl FnMut(&RequestStatusResponse) -> bool + Send + 'static {
    let mut first = true;
    move |_| std::mem::replace(&mut first, false)
}

/// Waits `delay` whenever `condition` holds, and not at all otherwise.
pub fn conditional_delay<C>(condition: C, delay: Duration) -> ConditionalDelay<C>
where
    C: FnMut(&RequestStatusResponse) -> bool + Send,
{
    ConditionalDelay { condition, delay }
}

/// See [`conditional_delay`].
#[derive(Debug)]
pub struct ConditionalDelay<C> {
    condition: C,
    delay: Duration,
}

impl<C: FnMut(&RequestStatusResponse) -> bool + Send> PollStrategy for ConditionalDelay<C> {
    fn next(&mut self, status: &RequestStatusResponse) -> Result<Duration, AgentError> {
        Ok(if (self.condition)(status) {
            self.delay
        } else {
            Duration::ZERO
        })
    }
}

/// Fails with `TimeoutWaitingForResponse` once `count` polls did not produce a result.
pub fn max_attempts(count: usize) -> MaxAttempts {
    MaxAttempts { remaining: count }
}

/// See [`max_attempts`].
#[derive(Debug, Clone)]
pub struct MaxAttempts {
    remaining: usize,
}

impl PollStrategy for MaxAttempts {
    fn next(&mut self, _: &RequestStatusResponse) -> Result<Duration, AgentError> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return Err(AgentError::TimeoutWaitingForResponse);
        }
        Ok(Duration::ZERO)
    }
}

/// Waits the same `delay` before every poll.
pub fn throttle(delay: Duration) -> Throttle {
    Throttle { delay }
}

/// See [`throttle`].
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
}

impl PollStrategy for Throttle {
    fn next(&mut self, _: &RequestStatusResponse) -> Result<Duration, AgentError> {
        Ok(self.delay)
    }
}

/// Waits the delays of a [`BackoffStrategy`], failing with `TimeoutWaitingForResponse` when it
/// runs out.
pub fn backoff<B: BackoffStrategy>(strategy: B) -> Backoff<B> {
    Backoff { strategy }
}

/// See [`backoff`].
#[derive(Debug)]
pub struct Backoff<B> {
    strategy: B,
}

impl<B: BackoffStrategy> PollStrategy for Backoff<B> {
    fn next(&mut self, _: &RequestStatusResponse) -> Result<Duration, AgentError> {
        self.strategy
            .next()
            .ok_or(AgentError::TimeoutWaitingForResponse)
    }
}

/// Fails with `TimeoutWaitingForResponse` once `duration` has passed since the strategy was
/// created.
pub fn timeout(duration: Duration) -> Timeout {
    Timeout {
        deadline: Instant::now() + duration,
    }
}

/// See [`timeout`].
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline: Instant,
}

impl PollStrategy for Timeout {
    fn next(&mut self, _: &RequestStatusResponse) -> Result<Duration, AgentError> {
        if Instant::now() > self.deadline {
            return Err(AgentError::TimeoutWaitingForResponse);
        }
        Ok(Duration::ZERO)
    }
}

/// Runs every strategy in order and waits for the sum of their delays. The first error
/// stops the chain.
pub fn chain(strategies: Vec<Box<dyn PollStrategy>>) -> Chain {
    Chain { strategies }
}

/// See [`chain`].
pub struct Chain {
    strategies: Vec<Box<dyn PollStrategy>>,
}

impl PollStrategy for Chain {
    fn next(&mut self, status: &RequestStatusResponse) -> Result<Duration, AgentError> {
        let mut total = Duration::ZERO;
        for strategy in &mut self.strategies {
            total += strategy.next(status)?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.strategies.len())
            .finish()
    }
}
