//! Bounded exponential-backoff retry for external calls.
//!
//! Every call to the completion or embedding service goes through a
//! [`RetryExecutor`]. The decision logic is the pure [`next_step`] function over
//! an explicit [`Attempt`] outcome; the executor only adds sleeping and the
//! per-attempt deadline.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::gateway::ProviderError;

/// Largest doubling exponent applied to the base delay.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Errors that know whether another attempt could help.
pub trait RetryableError: Sized {
    fn is_retryable(&self) -> bool;

    /// Error value standing in for an attempt that hit its deadline.
    fn deadline_exceeded(after: Duration) -> Self;
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }

    fn deadline_exceeded(after: Duration) -> Self {
        ProviderError::Timeout(after)
    }
}

/// Retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Deadline for a single attempt. `None` leaves it to the transport.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_attempt_timeout_secs() -> Option<u64> {
    Some(120)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            attempt_timeout_secs: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Failed, but another attempt may succeed.
    Transient(E),
    /// Failed in a way retrying cannot fix.
    Terminal(E),
}

impl<T, E: RetryableError> From<Result<T, E>> for Attempt<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(err) if err.is_retryable() => Attempt::Transient(err),
            Err(err) => Attempt::Terminal(err),
        }
    }
}

/// What the executor does after an attempt.
#[derive(Debug)]
pub enum Step<T, E> {
    Finish(T),
    Wait { delay: Duration, error: E },
    Fail(RetryError<E>),
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    #[error("non-retryable failure on attempt {attempt}: {source}")]
    Terminal { attempt: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Terminal { attempt, .. } => *attempt,
        }
    }

    /// The error from the final attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Terminal { source, .. } => source,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Terminal { source, .. } => source,
        }
    }
}

/// Decide what follows attempt number `attempt` (1-based).
pub fn next_step<T, E>(policy: &RetryPolicy, attempt: u32, outcome: Attempt<T, E>) -> Step<T, E> {
    match outcome {
        Attempt::Done(value) => Step::Finish(value),
        Attempt::Terminal(source) => Step::Fail(RetryError::Terminal { attempt, source }),
        Attempt::Transient(last) if attempt >= policy.attempts() => {
            Step::Fail(RetryError::Exhausted {
                attempts: attempt,
                last,
            })
        }
        Attempt::Transient(error) => Step::Wait {
            delay: policy.backoff(attempt),
            error,
        },
    }
}

/// Successful value plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or the budget is spent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &'static str,
        mut op: F,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        E: RetryableError + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.policy.attempt_timeout() {
                Some(deadline) => match timeout(deadline, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::deadline_exceeded(deadline)),
                },
                None => op().await,
            };

            match next_step(&self.policy, attempt, Attempt::from(result)) {
                Step::Finish(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    })
                }
                Step::Wait { delay, error } => {
                    debug!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure; retrying"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                Step::Fail(err) => return Err(err),
            }
        }
    }
}
