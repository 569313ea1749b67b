use crate::{PostforgeError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Ratio in `[0, 1)`. Zero keeps the backoff deterministic.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `min(base_delay * 2^attempt, max_delay)` for a 0-indexed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Where the executor goes after attempt `attempt` produced `outcome`.
    pub fn next_state<T>(&self, attempt: u32, outcome: &AttemptOutcome<T>) -> RetryState {
        let attempts = attempt + 1;
        match outcome {
            AttemptOutcome::Success(_) => RetryState::Succeeded { attempts },
            AttemptOutcome::Fatal(_) => RetryState::Fatal { attempts },
            AttemptOutcome::Retryable(_) if attempt < self.max_retries => RetryState::Backoff {
                attempt,
                delay: self.backoff_delay(attempt),
            },
            AttemptOutcome::Retryable(_) => RetryState::Exhausted { attempts },
        }
    }

    fn normalized(mut self) -> Self {
        if self.base_delay.is_zero() {
            self.base_delay = Duration::from_secs(1);
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            self.jitter = 0.0;
        }
        if self.jitter >= 1.0 {
            self.jitter = 0.99;
        }
        self
    }
}

#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(PostforgeError),
    Fatal(PostforgeError),
}

impl<T> AttemptOutcome<T> {
    pub fn classify(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) if err.is_retryable() => Self::Retryable(err),
            Err(err) => Self::Fatal(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Fatal { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Attempting { .. } | Self::Backoff { .. })
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    span: Span,
}

impl RetryExecutor {
    pub fn new(policy: Option<RetryPolicy>) -> Self {
        Self {
            policy: policy.unwrap_or_default().normalized(),
            span: Span::current(),
        }
    }

    /// Log every attempt of this executor under `span` instead of the caller's.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        ctx: CancellationToken,
        task_name: &str,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(ctx, task_name, operation)
            .instrument(self.span.clone())
            .await
    }

    async fn run<F, Fut, T>(
        &self,
        ctx: CancellationToken,
        task_name: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut state = RetryState::Attempting { attempt: 0 };

        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    if ctx.is_cancelled() {
                        break self.cancelled(task_name, RetryState::Cancelled { attempts: attempt });
                    }
                    debug!(task = task_name, attempt = attempt + 1, max_attempts, "starting attempt");

                    let result = tokio::select! {
                        biased;
                        _ = ctx.cancelled() => None,
                        result = operation(attempt) => Some(result),
                    };
                    let Some(result) = result else {
                        break self.cancelled(task_name, RetryState::Cancelled { attempts: attempt + 1 });
                    };

                    let outcome = AttemptOutcome::classify(result);
                    let next = self.policy.next_state(attempt, &outcome);
                    match outcome {
                        AttemptOutcome::Success(value) => {
                            info!(task = task_name, attempts = attempt + 1, "task succeeded");
                            break Ok(value);
                        }
                        AttemptOutcome::Fatal(err) => {
                            error!(
                                task = task_name,
                                attempt = attempt + 1,
                                kind = err.kind(),
                                error = %err,
                                "fatal failure, not retrying"
                            );
                            break Err(err);
                        }
                        AttemptOutcome::Retryable(err) => match next {
                            RetryState::Backoff { attempt, delay } => {
                                let delay = self.jittered(delay);
                                warn!(
                                    task = task_name,
                                    attempt = attempt + 1,
                                    max_attempts,
                                    kind = err.kind(),
                                    error = %err,
                                    delay_ms = delay.as_millis() as u64,
                                    "retryable failure, backing off"
                                );
                                RetryState::Backoff { attempt, delay }
                            }
                            _ => {
                                error!(
                                    task = task_name,
                                    attempts = attempt + 1,
                                    kind = err.kind(),
                                    error = %err,
                                    "retries exhausted"
                                );
                                break Err(PostforgeError::RetriesExhausted {
                                    task: task_name.to_string(),
                                    attempts: attempt + 1,
                                    last: Box::new(err),
                                });
                            }
                        },
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            break self.cancelled(task_name, RetryState::Cancelled { attempts: attempt + 1 });
                        }
                        _ = sleep(delay) => RetryState::Attempting { attempt: attempt + 1 },
                    }
                }
                terminal => unreachable!("terminal state {terminal:?} is never stored"),
            };
        }
    }

    fn cancelled<T>(&self, task_name: &str, state: RetryState) -> Result<T> {
        warn!(task = task_name, ?state, "task cancelled");
        let attempts = match state {
            RetryState::Cancelled { attempts } => attempts,
            _ => 0,
        };
        Err(PostforgeError::Cancelled(format!(
            "task {task_name} cancelled after {attempts} attempts"
        )))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.policy.jitter == 0.0 {
            return delay;
        }
        let spread = self.policy.jitter;
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor).min(self.policy.max_delay)
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
