//! 有界重试策略
//! Bounded retry policy
//!
//! 回调投递和副本推送共用同一个显式的重试策略对象：最大尝试次数、
//! 指数退避（带上限）以及可选的随机抖动。
//!
//! Callback delivery and replica pushes share one explicit retry policy
//! object: a maximum attempt count, capped exponential backoff and optional
//! random jitter.

use crate::config::millis;
use crate::error::{Error, Result};
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::trace;

/// Retry policy with capped exponential backoff.
/// 带上限的指数退避重试策略。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included. Never below one.
    /// 总尝试次数（包括第一次）。不小于1。
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    /// 第一次失败后的延迟。
    #[serde(rename = "initial-backoff-ms", deserialize_with = "millis::deserialize")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay, before jitter.
    /// 单次延迟的上限（不含抖动）。
    #[serde(rename = "max-backoff-ms", deserialize_with = "millis::deserialize")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    /// 相邻两次延迟之间的增长因子。
    pub multiplier: u32,
    /// Fraction of the delay added as random jitter, in `0.0..=1.0`.
    /// 作为随机抖动加入的延迟比例。
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Returns the same policy without random jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after `failed_attempt` (1-based) before trying again.
    ///
    /// `min(initial × multiplier^(n−1), max)` plus up to `jitter` of that value.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        let base = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);

        if self.jitter > 0.0 && !base.is_zero() {
            let spread = base.as_secs_f64() * self.jitter.min(1.0);
            let extra = rand::rng().random_range(0.0..=spread);
            base + Duration::from_secs_f64(extra)
        } else {
            base
        }
    }

    /// Runs `op` until it succeeds, the attempts are exhausted or `deadline`
    /// passes. Every attempt is bounded by `attempt_timeout`.
    ///
    /// Returns the last result together with the number of attempts made.
    ///
    /// 运行 `op` 直到成功、尝试次数耗尽或超过 `deadline`。
    /// 每次尝试都受 `attempt_timeout` 限制。返回最后结果及尝试次数。
    pub async fn run<T, F, Fut>(
        &self,
        attempt_timeout: Duration,
        deadline: Option<Instant>,
        mut op: F,
    ) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let budget = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return (Err(Error::Timeout), attempt - 1);
                    }
                    attempt_timeout.min(left)
                }
                None => attempt_timeout,
            };

            let result = match timeout(budget, op()).await {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            };

            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if attempt >= max_attempts => return (Err(err), attempt),
                Err(err) => {
                    let delay = self.backoff(attempt);
                    trace!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Attempt failed, backing off");
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            return (Err(err), attempt);
                        }
                    }
                    sleep(delay).await;
                }
            }
        }
    }
}
