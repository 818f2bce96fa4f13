/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Cooperative retry loops for offers into the replicated log.
//!
//! The hosting runtime may reject an offer while its transport is full. The
//! state machine never spawns a thread to wait this out; it polls the offer
//! on the calling thread, handing control to an [`IdleStrategy`] between
//! attempts, until the offer is accepted or the [`RetryPolicy`] budget is
//! spent.

use super::service::Publication;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Strategy for giving up the CPU between unsuccessful polls.
pub trait IdleStrategy {
    /// Idles after a poll that performed `work_count` units of work.
    ///
    /// Implementations reset their backoff when `work_count > 0`.
    fn idle_with(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
        } else {
            self.idle();
        }
    }

    /// Idles after a poll that performed no work.
    fn idle(&mut self);

    /// Resets any accumulated backoff.
    fn reset(&mut self);
}

/// Never idles. Used where the caller already controls pacing, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpIdleStrategy;

impl IdleStrategy for NoOpIdleStrategy {
    #[inline]
    fn idle(&mut self) {}

    #[inline]
    fn reset(&mut self) {}
}

/// Yields the thread on every idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    #[inline]
    fn idle(&mut self) {
        std::thread::yield_now();
    }

    #[inline]
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackoffState {
    NotIdle,
    Spinning,
    Yielding,
    Parking,
}

/// Spins, then yields, then parks with exponentially growing periods.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::retry::{BackoffIdleStrategy, IdleStrategy};
///
/// let mut idle = BackoffIdleStrategy::default();
/// idle.idle();
/// idle.reset();
/// ```
#[derive(Debug, Clone)]
pub struct BackoffIdleStrategy {
    max_spins: u32,
    max_yields: u32,
    min_park: Duration,
    max_park: Duration,
    state: BackoffState,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl BackoffIdleStrategy {
    /// Default number of busy spins before yielding.
    pub const DEFAULT_MAX_SPINS: u32 = 10;
    /// Default number of yields before parking.
    pub const DEFAULT_MAX_YIELDS: u32 = 5;
    /// Default shortest park period.
    pub const DEFAULT_MIN_PARK: Duration = Duration::from_micros(1);
    /// Default longest park period.
    pub const DEFAULT_MAX_PARK: Duration = Duration::from_millis(1);

    /// Creates a backoff strategy with explicit bounds.
    #[must_use]
    pub fn new(max_spins: u32, max_yields: u32, min_park: Duration, max_park: Duration) -> Self {
        Self {
            max_spins,
            max_yields,
            min_park,
            max_park: max_park.max(min_park),
            state: BackoffState::NotIdle,
            spins: 0,
            yields: 0,
            park: min_park,
        }
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_SPINS,
            Self::DEFAULT_MAX_YIELDS,
            Self::DEFAULT_MIN_PARK,
            Self::DEFAULT_MAX_PARK,
        )
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self) {
        match self.state {
            BackoffState::NotIdle => {
                self.state = BackoffState::Spinning;
                self.spins = 1;
                std::hint::spin_loop();
            }
            BackoffState::Spinning => {
                std::hint::spin_loop();
                self.spins += 1;
                if self.spins > self.max_spins {
                    self.state = BackoffState::Yielding;
                    self.yields = 0;
                }
            }
            BackoffState::Yielding => {
                self.yields += 1;
                if self.yields > self.max_yields {
                    self.state = BackoffState::Parking;
                    self.park = self.min_park;
                } else {
                    std::thread::yield_now();
                }
            }
            BackoffState::Parking => {
                std::thread::park_timeout(self.park);
                self.park = (self.park * 2).min(self.max_park);
            }
        }
    }

    fn reset(&mut self) {
        self.state = BackoffState::NotIdle;
        self.spins = 0;
        self.yields = 0;
        self.park = self.min_park;
    }
}

/// Budget for a retry loop.
///
/// Both limits are optional; when both are `None` the loop retries forever.
/// When both are set, whichever is reached first ends the loop.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::retry::RetryPolicy;
///
/// let policy = RetryPolicy::attempts(3);
/// assert!(policy.is_bounded());
/// assert!(!RetryPolicy::unbounded().is_bounded());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: Option<u64>,

    /// Wall-clock budget in milliseconds, measured from the first attempt.
    pub timeout_ms: Option<u64>,
}

impl RetryPolicy {
    /// Retries until the operation succeeds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            timeout_ms: None,
        }
    }

    /// Gives up after `max_attempts` attempts.
    #[must_use]
    pub const fn attempts(max_attempts: u64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            timeout_ms: None,
        }
    }

    /// Gives up once `timeout` has elapsed.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            max_attempts: None,
            timeout_ms: Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Returns `true` if the loop can give up.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.max_attempts.is_some() || self.timeout_ms.is_some()
    }

    pub(crate) fn start(&self) -> RetryBudget {
        RetryBudget {
            policy: *self,
            started: Instant::now(),
            attempts: 0,
        }
    }
}

/// Attempts and elapsed time of a running retry loop.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    policy: RetryPolicy,
    started: Instant,
    attempts: u64,
}

impl RetryBudget {
    /// Counts one attempt.
    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns `true` once either limit has been reached.
    pub(crate) fn is_exhausted(&self) -> bool {
        if self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return true;
        }
        self.policy
            .timeout_ms
            .is_some_and(|ms| self.elapsed() >= Duration::from_millis(ms))
    }
}

/// Errors raised when an offer cannot be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The retry budget ran out while the transport kept rejecting the offer.
    #[error("offer rejected after {attempts} attempts in {elapsed_ms} ms")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u64,
        /// Time spent retrying, in milliseconds.
        elapsed_ms: u64,
    },
}

/// Offers `message` until the publication accepts it or `policy` runs out.
///
/// Returns the number of attempts it took.
///
/// # Errors
///
/// Returns [`PublishError::RetryExhausted`] if the budget is spent first.
///
/// # Examples
///
/// ```
/// use heartbeat_sequencer::sequencer::journal::InMemoryJournal;
/// use heartbeat_sequencer::sequencer::retry::{offer_with_retry, NoOpIdleStrategy, RetryPolicy};
///
/// let mut journal = InMemoryJournal::new();
/// journal.reject_next(2);
/// let attempts = offer_with_retry(&mut journal, b"\x0f", &mut NoOpIdleStrategy, &RetryPolicy::unbounded())
///     .unwrap();
/// assert_eq!(attempts, 3);
/// ```
pub fn offer_with_retry<P, I>(
    publication: &mut P,
    message: &[u8],
    idle: &mut I,
    policy: &RetryPolicy,
) -> Result<u64, PublishError>
where
    P: Publication + ?Sized,
    I: IdleStrategy + ?Sized,
{
    let mut budget = policy.start();
    idle.reset();
    loop {
        budget.record_attempt();
        if publication.offer(message) {
            return Ok(budget.attempts());
        }
        if budget.is_exhausted() {
            return Err(PublishError::RetryExhausted {
                attempts: budget.attempts(),
                elapsed_ms: u64::try_from(budget.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }
        idle.idle();
    }
}
