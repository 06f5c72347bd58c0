use std::fmt;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelScope;
use crate::config::PipelineConfig;
use crate::logging::{LogLevel, LogRecord, LogSink};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_attempts.max(1), config.retry_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::ZERO)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },
    #[error("non-retryable failure: {0}")]
    Fatal(E),
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
}

/// Runs `op` until it succeeds, fails with a non-retryable error, the policy's
/// attempt budget is spent, or `scope` is cancelled. `op` receives the
/// 1-based attempt number.
pub fn retry_with_policy<T, E, F>(
    policy: &RetryPolicy,
    scope: &CancelScope,
    sink: &dyn LogSink,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Result<T, E>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if scope.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            sink.log(LogRecord::new(
                LogLevel::Warn,
                format!("[{label}] attempt {attempt}/{max_attempts} failed, not retrying: {err}"),
            ));
            return Err(RetryError::Fatal(err));
        }

        sink.log(LogRecord::new(
            LogLevel::Warn,
            format!("[{label}] attempt {attempt}/{max_attempts} failed: {err}"),
        ));

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        if !policy.delay.is_zero() {
            thread::sleep(scope.bound(policy.delay));
        }
    }
}
