//! Backend-driven transfers.
//!
//! The server owns money movement: `prepare` makes sure an approved plan exists
//! for the deposit, and each `transfer` waits until the server reports that
//! bucket's action as executed. Retries go through the plan retry endpoint.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::poller::{PlanPoller, PollOutcome};
use super::state::Allocation;
use super::{CancelHandle, TransferExecutor, CANCELLED_MESSAGE};
use crate::allocation::round_cents;
use crate::api::types::{
    ActionExecutionResult, ActionResultStatus, CreateSplitPlan, PlanActionInput, PlanStatus,
    SplitPlan,
};
use crate::api::{ApiError, PlanApi};
use crate::config::ClientConfig;

pub struct BackendTransfers<'a, A: PlanApi> {
    api: &'a A,
    poll_interval: Duration,
    max_polls: Option<u32>,
    plan_id: Mutex<Option<String>>,
    /// Per-bucket outcomes of the last retry call, consumed by `transfer`
    retry_results: Mutex<HashMap<String, ActionExecutionResult>>,
}

impl<'a, A: PlanApi> BackendTransfers<'a, A> {
    pub fn new(api: &'a A, poll_interval: Duration, max_polls: Option<u32>) -> Self {
        Self {
            api,
            poll_interval,
            max_polls,
            plan_id: Mutex::new(None),
            retry_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(api: &'a A, cfg: &ClientConfig) -> Self {
        Self::new(api, cfg.poll_interval(), cfg.max_poll_attempts)
    }

    /// Plan in use, once `prepare` has run
    pub fn plan_id(&self) -> Option<String> {
        self.plan_id.lock().clone()
    }

    fn poller(&self) -> PlanPoller<'_, A> {
        PlanPoller::new(self.api, self.poll_interval, self.max_polls)
    }

    async fn existing_plan(&self, deposit_id: &str) -> Result<Option<SplitPlan>, ApiError> {
        match self.api.split_plan_by_deposit(deposit_id).await {
            Ok(plan) if plan.status == PlanStatus::Cancelled => {
                debug!(deposit_id, plan_id = %plan.id, "ignoring cancelled plan");
                Ok(None)
            }
            Ok(plan) => Ok(Some(plan)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn resolve_plan_id(&self, deposit_id: &str) -> Result<String, ApiError> {
        if let Some(id) = self.plan_id() {
            return Ok(id);
        }
        let plan = self.api.split_plan_by_deposit(deposit_id).await?;
        *self.plan_id.lock() = Some(plan.id.clone());
        Ok(plan.id)
    }
}

/// First difference between a plan's actions and the confirmed allocations,
/// compared per bucket at cent precision
fn plan_mismatch(plan: &SplitPlan, allocations: &[Allocation]) -> Option<String> {
    for allocation in allocations {
        let confirmed = round_cents(allocation.amount);
        match plan.action_for_bucket(&allocation.bucket_id) {
            None => return Some(format!("no action for bucket {}", allocation.bucket_id)),
            Some(action) if (round_cents(action.amount) - confirmed).abs() >= 0.005 => {
                return Some(format!(
                    "bucket {} is {:.2} on the server, {:.2} confirmed",
                    allocation.bucket_id, action.amount, confirmed
                ));
            }
            Some(_) => {}
        }
    }
    plan.actions
        .iter()
        .find(|action| !allocations.iter().any(|a| a.bucket_id == action.bucket_id))
        .map(|action| format!("unexpected action for bucket {}", action.bucket_id))
}

/// Outcome of one bucket in a plan snapshot; `None` while still pending
fn bucket_outcome(plan: &SplitPlan, bucket_id: &str) -> Option<Result<(), String>> {
    if plan.status == PlanStatus::Cancelled {
        return Some(Err("Plan cancelled".to_string()));
    }
    match plan.action_for_bucket(bucket_id) {
        None => Some(Err(format!("No transfer scheduled for bucket {}", bucket_id))),
        Some(action) if action.executed => Some(Ok(())),
        Some(_) => None,
    }
}

impl<A: PlanApi> TransferExecutor for BackendTransfers<'_, A> {
    async fn prepare(
        &self,
        deposit_id: &str,
        total_amount: f64,
        allocations: &[Allocation],
    ) -> Result<(), ApiError> {
        self.retry_results.lock().clear();

        let plan = match self.existing_plan(deposit_id).await? {
            Some(plan) => {
                if let Some(detail) = plan_mismatch(&plan, allocations) {
                    warn!(deposit_id, plan_id = %plan.id, status = plan.status.as_str(), %detail, "existing split plan differs");
                    return Err(ApiError::PlanMismatch {
                        plan_id: plan.id,
                        status: plan.status.as_str().to_string(),
                        detail,
                    });
                }
                info!(deposit_id, plan_id = %plan.id, status = plan.status.as_str(), "reusing split plan");
                plan
            }
            None => {
                let body = CreateSplitPlan {
                    deposit_id: deposit_id.to_string(),
                    total_amount: round_cents(total_amount),
                    actions: allocations
                        .iter()
                        .map(|a| PlanActionInput {
                            bucket_id: a.bucket_id.clone(),
                            amount: round_cents(a.amount),
                        })
                        .collect(),
                };
                let plan = self.api.create_split_plan(&body).await?;
                info!(deposit_id, plan_id = %plan.id, actions = plan.actions.len(), "split plan created");
                plan
            }
        };

        if matches!(plan.status, PlanStatus::Draft | PlanStatus::PendingApproval) {
            self.api.approve_split_plan(&plan.id).await?;
            info!(deposit_id, plan_id = %plan.id, "split plan approved");
        }

        *self.plan_id.lock() = Some(plan.id);
        Ok(())
    }

    async fn prepare_retry(&self, deposit_id: &str, failed: &[Allocation]) -> Result<(), ApiError> {
        let plan_id = self.resolve_plan_id(deposit_id).await?;
        let resp = self.api.retry_split_plan(&plan_id).await?;

        info!(
            deposit_id,
            plan_id = %plan_id,
            status = %resp.status,
            completed = resp.completed_amount,
            failed = resp.failed_amount,
            "split plan retried"
        );

        let mut results = self.retry_results.lock();
        results.clear();
        for result in resp.action_results {
            if failed.iter().any(|a| a.bucket_id == result.bucket_id) {
                results.insert(result.bucket_id.clone(), result);
            }
        }
        Ok(())
    }

    async fn transfer(
        &self,
        deposit_id: &str,
        allocation: &Allocation,
        cancel: &CancelHandle,
    ) -> Result<(), String> {
        let bucket_id = allocation.bucket_id.as_str();

        let retried = self.retry_results.lock().remove(bucket_id);
        if let Some(result) = retried {
            match result.status {
                status if status.is_done() => return Ok(()),
                ActionResultStatus::Failed => {
                    return Err(result.error.unwrap_or_else(|| "Retry failed".to_string()));
                }
                _ => debug!(bucket_id, "retry still in progress, polling"),
            }
        }

        match self
            .poller()
            .poll_until(deposit_id, cancel, |plan| bucket_outcome(plan, bucket_id))
            .await
        {
            PollOutcome::Ready(outcome) => outcome,
            PollOutcome::Cancelled => Err(CANCELLED_MESSAGE.to_string()),
            PollOutcome::Exhausted { attempts, .. } => {
                warn!(deposit_id, bucket_id, attempts, "transfer did not settle");
                Err(format!(
                    "Timed out waiting for transfer after {} status checks",
                    attempts
                ))
            }
        }
    }
}
