//! Offline executors: a randomized simulation for demos and a scripted one
//! for deterministic tests.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::debug;

use super::state::Allocation;
use super::{CancelHandle, TransferExecutor};
use crate::api::ApiError;

pub const TRANSFER_TIMEOUT_MESSAGE: &str = "Transfer timed out";
pub const RETRY_FAILED_MESSAGE: &str = "Retry failed";

/// Random-latency, random-failure transfers
#[derive(Debug)]
pub struct SimulatedTransfers {
    pub failure_rate: f64,
    pub retry_failure_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
    attempted: Mutex<HashSet<String>>,
}

impl Default for SimulatedTransfers {
    fn default() -> Self {
        Self {
            failure_rate: 0.05,
            retry_failure_rate: 0.10,
            min_delay: Duration::from_millis(600),
            max_delay: Duration::from_millis(1000),
            attempted: Mutex::new(HashSet::new()),
        }
    }
}

impl SimulatedTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// No latency; useful in tests
    pub fn instant(failure_rate: f64, retry_failure_rate: f64) -> Self {
        Self {
            failure_rate,
            retry_failure_rate,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

impl TransferExecutor for SimulatedTransfers {
    async fn prepare(
        &self,
        _deposit_id: &str,
        _total_amount: f64,
        _allocations: &[Allocation],
    ) -> Result<(), ApiError> {
        self.attempted.lock().clear();
        Ok(())
    }

    /// Marks the buckets as already attempted, so a retry in a fresh process
    /// still uses the retry rate
    async fn prepare_retry(&self, _deposit_id: &str, failed: &[Allocation]) -> Result<(), ApiError> {
        self.attempted
            .lock()
            .extend(failed.iter().map(|a| a.bucket_id.clone()));
        Ok(())
    }

    async fn transfer(
        &self,
        deposit_id: &str,
        allocation: &Allocation,
        _cancel: &CancelHandle,
    ) -> Result<(), String> {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let is_retry = !self.attempted.lock().insert(allocation.bucket_id.clone());
        let (rate, message) = if is_retry {
            (self.retry_failure_rate, RETRY_FAILED_MESSAGE)
        } else {
            (self.failure_rate, TRANSFER_TIMEOUT_MESSAGE)
        };

        let failed = rand::thread_rng().gen_bool(rate.clamp(0.0, 1.0));
        debug!(deposit_id, bucket_id = %allocation.bucket_id, is_retry, failed, "simulated transfer");
        if failed {
            Err(message.to_string())
        } else {
            Ok(())
        }
    }
}

/// Scripted result for one transfer call
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeed,
    Fail(String),
    /// Cancel the run while the transfer is in flight, then succeed
    CancelDuring,
}

/// Deterministic executor: each bucket pops its next scripted outcome,
/// succeeding once the script runs out.
#[derive(Default)]
pub struct ScriptedTransfers {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<String>>,
    prepare_error: Mutex<Option<ApiError>>,
    retry_preparations: Mutex<usize>,
}

impl ScriptedTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, bucket_id: &str, outcomes: Vec<Outcome>) {
        self.scripts
            .lock()
            .insert(bucket_id.to_string(), outcomes.into());
    }

    /// Make the next `prepare` or `prepare_retry` fail
    pub fn fail_prepare(&self, err: ApiError) {
        *self.prepare_error.lock() = Some(err);
    }

    /// Buckets transferred so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn retry_preparations(&self) -> usize {
        *self.retry_preparations.lock()
    }

    fn take_prepare_error(&self) -> Result<(), ApiError> {
        match self.prepare_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl TransferExecutor for ScriptedTransfers {
    async fn prepare(
        &self,
        _deposit_id: &str,
        _total_amount: f64,
        _allocations: &[Allocation],
    ) -> Result<(), ApiError> {
        self.take_prepare_error()
    }

    async fn prepare_retry(&self, _deposit_id: &str, _failed: &[Allocation]) -> Result<(), ApiError> {
        *self.retry_preparations.lock() += 1;
        self.take_prepare_error()
    }

    async fn transfer(
        &self,
        _deposit_id: &str,
        allocation: &Allocation,
        cancel: &CancelHandle,
    ) -> Result<(), String> {
        self.calls.lock().push(allocation.bucket_id.clone());
        let next = self
            .scripts
            .lock()
            .get_mut(&allocation.bucket_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Outcome::Succeed);

        match next {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(reason) => Err(reason),
            Outcome::CancelDuring => {
                cancel.cancel();
                Ok(())
            }
        }
    }
}
