// ai
//! 🪣 The RateGovernor — a leaky bucket with a mutex and a grudge.
//!
//! 🎬 *[a table is provisioned for 1000 units per second]*
//! *[sixty-four workers wake up hungry]*
//! *["there's enough for everyone," the governor lies]*
//!
//! Every billed operation (a scan page, a put, a batch put) checks in here first.
//! Workers wait until the bucket is positive, fire exactly one operation, then pay
//! for it after the fact. Admission is optimistic: several workers can squeeze past a
//! small positive balance at the same moment and drive it negative. That is fine.
//! The overdraft is paid back out of the next refill, so the budget holds on average
//! over the refill period, not per operation.
//!
//! 🧠 Knowledge graph:
//! - `consume(n)`: subtract, no floor. Debt is allowed. Debt is expected.
//! - `refill()`: once per second from `spawn_refill_ticker`, policy decides the ceiling
//! - `admit()`: the waiting room. Polls at `poll_interval` and wakes early on refill.
//! - One `std::sync::Mutex<i64>` guards the counter. Nothing holds it across an await.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// 🎚️ How a refill treats unused capacity.
///
/// - `Capped`: after a refill the balance never exceeds one tick's allotment. Debt is
///   paid down first; a positive balance is reset to exactly `refill_rate`.
///   Idle seconds do not stockpile into a burst.
/// - `Accumulating`: every refill adds `refill_rate`, no ceiling. A quiet minute
///   becomes a loud second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillPolicy {
    #[default]
    Capped,
    Accumulating,
}

/// 🪣 The shared admission counter. Wrap it in an `Arc`, hand a clone to every worker.
#[derive(Debug)]
pub(crate) struct RateGovernor {
    capacity: Mutex<i64>,
    refill_rate: i64,
    policy: RefillPolicy,
    poll_interval: Duration,
    refilled: Notify,
}

impl RateGovernor {
    /// 🚀 Starts full: initial capacity equals the per-second budget.
    pub(crate) fn new(budget: u64, policy: RefillPolicy, poll_interval: Duration) -> Self {
        let refill_rate = i64::try_from(budget).unwrap_or(i64::MAX);
        Self {
            capacity: Mutex::new(refill_rate),
            refill_rate,
            policy,
            poll_interval,
            refilled: Notify::new(),
        }
    }

    // -- 🔒 a poisoned lock still holds a perfectly good integer
    fn with_capacity<T>(&self, f: impl FnOnce(&mut i64) -> T) -> T {
        let mut capacity = self.capacity.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut capacity)
    }

    /// 💸 Pay for an operation that already happened. May go negative.
    pub(crate) fn consume(&self, units: i64) {
        self.with_capacity(|capacity| *capacity = capacity.saturating_sub(units));
    }

    /// 💧 One tick's worth of budget, shaped by the policy. Wakes anyone waiting.
    pub(crate) fn refill(&self) {
        let balance = self.with_capacity(|capacity| {
            *capacity = match self.policy {
                RefillPolicy::Accumulating => capacity.saturating_add(self.refill_rate),
                RefillPolicy::Capped => capacity
                    .saturating_add(self.refill_rate)
                    .min(self.refill_rate),
            };
            *capacity
        });
        trace!(balance, "💧 governor refilled");
        if balance > 0 {
            self.refilled.notify_waiters();
        }
    }

    /// 👀 Current balance.
    pub(crate) fn value(&self) -> i64 {
        self.with_capacity(|capacity| *capacity)
    }

    pub(crate) fn refill_rate(&self) -> i64 {
        self.refill_rate
    }

    /// 🚦 Block until the balance is positive.
    ///
    /// Checks at least once per `poll_interval`; a refill wakes waiters immediately.
    /// Returning does NOT reserve anything. Go do your one operation, then `consume`.
    pub(crate) async fn admit(&self) {
        loop {
            // -- 📮 register interest before checking, so a refill between the check
            // -- and the wait is not missed
            let refilled = self.refilled.notified();
            if self.value() > 0 {
                return;
            }
            tokio::select! {
                _ = refilled => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// ⏰ Refill the governor every `period` until the handle is aborted.
///
/// This task has no natural end. The coordinator aborts it once every worker
/// has joined.
pub(crate) fn spawn_refill_ticker(governor: Arc<RateGovernor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // -- ⏭️ the first tick fires immediately and the bucket already starts full
        ticker.tick().await;
        loop {
            ticker.tick().await;
            governor.refill();
        }
    })
}
