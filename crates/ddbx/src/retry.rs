// ai
//! 🔄 RetryPolicy — "have you tried turning it off and on again", but bounded.
//!
//! Wraps exactly one billed operation: a scan page, a put, a batch put, an upload,
//! an object open. Each failure is logged, slept on, and tried again. When the
//! attempts run out, the failure becomes a `RetryExhausted` and it is fatal for the
//! worker that owns it. No skip-and-continue. A worker that cannot make progress
//! stops loudly instead of quietly dropping records on the floor.
//!
//! 🧠 Knowledge graph:
//! - reads back off with bounded random jitter (workers spread out)
//! - writes back off linearly (throttled writes need real breathing room)
//! - uploads back off linearly, with fewer, longer waits
//! - shapes and attempt counts live in `[retry.*]` config

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// ⏳ How long to wait before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Backoff {
    /// `step_ms × attempts so far` — 1×, 2×, 3×...
    Linear { step_ms: u64 },
    /// uniformly random in `[min_ms, max_ms]`
    BoundedRandom { min_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// 🎲 Delay after the `failed_attempts`-th failure (1-based).
    pub(crate) fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            Backoff::Linear { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(failed_attempts)))
            }
            Backoff::BoundedRandom { min_ms, max_ms } => {
                let (low, high) = if min_ms <= max_ms {
                    (min_ms, max_ms)
                } else {
                    (max_ms, min_ms)
                };
                Duration::from_millis(rand::thread_rng().gen_range(low..=high))
            }
        }
    }
}

/// 🔁 Bounded attempts + a backoff shape. Cheap to copy, one per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// 📖 Scans: a handful of tries, jittered.
    pub fn reads() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::BoundedRandom {
                min_ms: 100,
                max_ms: 1_000,
            },
        }
    }

    /// ✍️ Puts and batch puts: many tries, linear and stubborn.
    pub fn writes() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::Linear { step_ms: 200 },
        }
    }

    /// 🪣 Uploads and object opens: few tries, long pauses.
    pub fn uploads() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear { step_ms: 1_000 },
        }
    }

    /// 🚀 Run `attempt` until it succeeds or `max_attempts` is used up.
    ///
    /// The closure is called once per attempt and must build a fresh future each time.
    /// On exhaustion the error is a [`RetryExhausted`] carrying the last cause.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(Retried { value, attempts }),
                Err(cause) if attempts >= max_attempts => {
                    return Err(RetryExhausted {
                        operation: operation.to_string(),
                        attempts,
                        cause,
                    }
                    .into());
                }
                Err(cause) => {
                    let delay = self.backoff.delay(attempts);
                    warn!(
                        operation,
                        attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "🔄 attempt failed, backing off: {cause:#}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// ✅ A successful result plus how many tries it took (1 = first time lucky).
#[derive(Debug)]
pub(crate) struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// 💀 Every attempt failed. The owning worker is done.
#[derive(Debug)]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub cause: anyhow::Error,
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "💀 '{}' failed {} times in a row. We backed off. We came back. It kept saying no.",
            self.operation, self.attempts
        )
    }
}

impl std::error::Error for RetryExhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = self.cause.as_ref();
        Some(cause)
    }
}
