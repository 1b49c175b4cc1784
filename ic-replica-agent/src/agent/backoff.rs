//! Delays between retries of a failed request.

use ::backoff::backoff::Backoff;
use std::{sync::Arc, time::Duration, time::Instant};

/// A source of delays between attempts. `None` means no further attempt should be made.
///
/// A strategy is used for a single request and then dropped; restarting means creating a
/// new one from a [`BackoffStrategyFactory`].
pub trait BackoffStrategy: Send {
    /// The delay before the next attempt, or `None` to stop retrying.
    fn next(&mut self) -> Option<Duration>;
}

impl<B: BackoffStrategy + ?Sized> BackoffStrategy for Box<B> {
    fn next(&mut self) -> Option<Duration> {
        (**self).next()
    }
}

/// Creates a fresh [`BackoffStrategy`] for each request.
pub type BackoffStrategyFactory = Arc<dyn Fn() -> Box<dyn BackoffStrategy> + Send + Sync>;

/// The parameters of an [`ExponentialBackoff`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoffOptions {
    /// The base delay; the first delay is this times `multiplier`.
    pub initial_interval: Duration,
    /// The factor applied to the delay on every attempt.
    pub multiplier: f64,
    /// The delay never grows past this.
    pub max_interval: Duration,
    /// Each delay is picked uniformly within this fraction around the current interval.
    pub randomization_factor: f64,
    /// Stop after this many delays.
    pub max_iterations: Option<usize>,
    /// Stop once this much time has passed since the strategy was created.
    pub max_elapsed_time: Option<Duration>,
}

impl Default for ExponentialBackoffOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.2,
            max_iterations: None,
            max_elapsed_time: Some(Duration::from_secs(5 * 60)),
        }
    }
}

/// Exponentially growing, jittered delays.
#[derive(Debug)]
pub struct ExponentialBackoff {
    inner: ::backoff::ExponentialBackoff,
    iterations: usize,
    max_iterations: Option<usize>,
}

impl ExponentialBackoff {
    /// Starts a new backoff sequence.
    pub fn new(options: ExponentialBackoffOptions) -> Self {
        let first = options
            .initial_interval
            .mul_f64(options.multiplier)
            .min(options.max_interval);
        Self {
            inner: ::backoff::ExponentialBackoff {
                initial_interval: options.initial_interval,
                current_interval: first,
                randomization_factor: options.randomization_factor,
                multiplier: options.multiplier,
                start_time: Instant::now(),
                max_interval: options.max_interval,
                max_elapsed_time: options.max_elapsed_time,
                clock: ::backoff::SystemClock::default(),
            },
            iterations: 0,
            max_iterations: options.max_iterations,
        }
    }

    /// The number of delays handed out so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// A factory creating a fresh backoff with these options for every request.
    pub fn factory(options: ExponentialBackoffOptions) -> BackoffStrategyFactory {
        Arc::new(move || Box::new(ExponentialBackoff::new(options)))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(ExponentialBackoffOptions::default())
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next(&mut self) -> Option<Duration> {
        if matches!(self.max_iterations, Some(max) if self.iterations >= max) {
            return None;
        }
        let delay = self.inner.next_backoff()?;
        self.iterations += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ExponentialBackoffOptions {
        ExponentialBackoffOptions {
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    #[test]
    fn grows_by_the_multiplier_up_to_the_cap() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_interval: Duration::from_secs(2),
            ..no_jitter()
        });
        let millis: Vec<u128> = (0..5)
            .map(|_| backoff.next().unwrap().as_millis())
            .collect();
        assert_eq!(millis, [750, 1125, 1687, 2000, 2000]);
    }

    #[test]
    fn jitter_stays_within_the_randomization_factor() {
        let mut backoff = ExponentialBackoff::default();
        let first = backoff.next().unwrap();
        assert!(first >= Duration::from_millis(600), "{first:?}");
        assert!(first <= Duration::from_millis(901), "{first:?}");
    }

    #[test]
    fn stops_after_max_iterations() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_iterations: Some(3),
            ..no_jitter()
        });
        assert_eq!((0..10).filter_map(|_| backoff.next()).count(), 3);
        assert_eq!(backoff.iterations(), 3);
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn stops_after_max_elapsed_time() {
        let mut backoff = ExponentialBackoff::new(ExponentialBackoffOptions {
            max_elapsed_time: Some(Duration::ZERO),
            ..no_jitter()
        });
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn factory_restarts_the_sequence() {
        let factory = ExponentialBackoff::factory(ExponentialBackoffOptions {
            max_iterations: Some(1),
            ..no_jitter()
        });
        let mut first = factory();
        assert!(first.next().is_some());
        assert!(first.next().is_none());
        let mut second = factory();
        assert_eq!(second.next().map(|d| d.as_millis()), Some(750));
    }
}
