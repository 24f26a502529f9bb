//! Plan status polling.
//!
//! Fetches the deposit's split plan on a fixed interval until a check says
//! it is done, the run is cancelled, or the optional attempt budget runs out.
//! Failed fetches are logged and polling continues.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::CancelHandle;
use crate::api::types::SplitPlan;
use crate::api::PlanApi;

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready(T),
    Cancelled,
    /// Attempt budget used up; carries the last plan seen, if any
    Exhausted {
        attempts: u32,
        last: Option<SplitPlan>,
    },
}

pub struct PlanPoller<'a, A: PlanApi> {
    api: &'a A,
    interval: Duration,
    max_attempts: Option<u32>,
}

impl<'a, A: PlanApi> PlanPoller<'a, A> {
    pub fn new(api: &'a A, interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            api,
            // tokio intervals must be non-zero
            interval: interval.max(Duration::from_millis(1)),
            max_attempts,
        }
    }

    /// Poll until `check` returns `Some`. The first fetch happens immediately.
    pub async fn poll_until<T, F>(
        &self,
        deposit_id: &str,
        cancel: &CancelHandle,
        mut check: F,
    ) -> PollOutcome<T>
    where
        F: FnMut(&SplitPlan) -> Option<T>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u32 = 0;
        let mut last = None;

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                debug!(deposit_id, attempts, "plan polling cancelled");
                return PollOutcome::Cancelled;
            }

            attempts += 1;
            match self.api.split_plan_by_deposit(deposit_id).await {
                Ok(plan) => {
                    if let Some(value) = check(&plan) {
                        return PollOutcome::Ready(value);
                    }
                    last = Some(plan);
                }
                Err(e) if e.is_not_found() => {
                    debug!(deposit_id, attempts, "split plan not visible yet");
                }
                Err(e) => {
                    warn!(deposit_id, attempts, error = %e, "plan poll failed, will retry");
                }
            }

            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    warn!(deposit_id, attempts, "plan polling gave up");
                    return PollOutcome::Exhausted { attempts, last };
                }
            }
        }
    }

    /// Follow a plan until it is settled or cancelled, reporting every fetch
    pub async fn watch<F>(
        &self,
        deposit_id: &str,
        cancel: &CancelHandle,
        mut on_update: F,
    ) -> PollOutcome<SplitPlan>
    where
        F: FnMut(&SplitPlan),
    {
        self.poll_until(deposit_id, cancel, |plan| {
            on_update(plan);
            (plan.is_settled() || plan.status.is_terminal()).then(|| plan.clone())
        })
        .await
    }
}
