//! In-memory backend for unit tests.

use parking_lot::Mutex;
use std::collections::HashSet;

use super::types::{
    ActionExecutionResult, ActionResultStatus, Bucket, CreateSplitPlan, Deposit, PlanStatus,
    SplitAction, SplitExecutionResponse, SplitPlan, SplitPlanPreview,
};
use super::{ApiError, BucketApi, PlanApi};

#[derive(Default)]
pub struct MockState {
    /// Plan served by `by-deposit`; `None` answers 404
    pub plan: Option<SplitPlan>,
    /// Actions executed by the "server" on every `by-deposit` poll
    pub progress_per_poll: usize,
    /// Buckets whose actions never execute
    pub stuck: HashSet<String>,
    /// Upcoming polls that answer 500
    pub failing_polls: u32,
    /// Outcome of the next retry; `None` completes every unexecuted action
    pub retry_response: Option<SplitExecutionResponse>,
    /// Upcoming plan creations that answer 404
    pub missing_deposit: bool,
    pub buckets: Vec<Bucket>,
    pub reject_reorder: bool,
    /// Endpoint log, e.g. `"approve plan-1"`
    pub calls: Vec<String>,
    pub polls: u32,
}

#[derive(Default)]
pub struct MockApi {
    pub state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(plan: SplitPlan) -> Self {
        let api = Self::default();
        api.state.lock().plan = Some(plan);
        api
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn log(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

pub fn plan(deposit_id: &str, status: PlanStatus, buckets: &[(&str, f64, bool)]) -> SplitPlan {
    SplitPlan {
        id: "plan-1".to_string(),
        deposit_id: deposit_id.to_string(),
        total_amount: buckets.iter().map(|(_, amount, _)| amount).sum(),
        status,
        approved_at: None,
        executed_at: None,
        actions: buckets
            .iter()
            .enumerate()
            .map(|(i, (bucket_id, amount, executed))| SplitAction {
                id: format!("action-{}", i + 1),
                split_plan_id: "plan-1".to_string(),
                bucket_id: bucket_id.to_string(),
                amount: *amount,
                executed: *executed,
                executed_at: None,
            })
            .collect(),
    }
}

impl PlanApi for MockApi {
    async fn pending_deposits(&self) -> Result<Vec<Deposit>, ApiError> {
        self.log("pending_deposits".to_string());
        Ok(Vec::new())
    }

    async fn get_deposit(&self, deposit_id: &str) -> Result<Deposit, ApiError> {
        self.log(format!("get_deposit {}", deposit_id));
        Err(ApiError::NotFound("Deposit not found".to_string()))
    }

    async fn preview_split_plan(&self, deposit_id: &str) -> Result<SplitPlanPreview, ApiError> {
        self.log(format!("preview {}", deposit_id));
        Err(ApiError::NotFound("Deposit not found".to_string()))
    }

    async fn create_split_plan(&self, body: &CreateSplitPlan) -> Result<SplitPlan, ApiError> {
        self.log(format!("create {}", body.deposit_id));
        let mut state = self.state.lock();
        if state.missing_deposit {
            return Err(ApiError::NotFound("Deposit not found".to_string()));
        }

        let buckets: Vec<(&str, f64, bool)> = body
            .actions
            .iter()
            .map(|a| (a.bucket_id.as_str(), a.amount, false))
            .collect();
        let created = plan(&body.deposit_id, PlanStatus::Draft, &buckets);
        state.plan = Some(created.clone());
        Ok(created)
    }

    async fn approve_split_plan(&self, plan_id: &str) -> Result<SplitPlan, ApiError> {
        self.log(format!("approve {}", plan_id));
        let mut state = self.state.lock();
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| ApiError::NotFound("Split plan not found".to_string()))?;
        plan.status = PlanStatus::Approved;
        Ok(plan.clone())
    }

    async fn split_plan_by_deposit(&self, deposit_id: &str) -> Result<SplitPlan, ApiError> {
        let mut state = self.state.lock();
        state.calls.push(format!("by_deposit {}", deposit_id));
        state.polls += 1;

        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(ApiError::Status {
                status: 500,
                detail: "HTTP 500".to_string(),
            });
        }

        let progress = state.progress_per_poll;
        let stuck = state.stuck.clone();
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| ApiError::NotFound("Split plan not found".to_string()))?;

        let mut remaining = progress;
        for action in plan.actions.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !action.executed && !stuck.contains(&action.bucket_id) {
                action.executed = true;
                remaining -= 1;
            }
        }
        if plan.actions.iter().all(|a| a.executed) && !plan.actions.is_empty() {
            plan.status = PlanStatus::Completed;
        }
        Ok(plan.clone())
    }

    async fn retry_split_plan(&self, plan_id: &str) -> Result<SplitExecutionResponse, ApiError> {
        self.log(format!("retry {}", plan_id));
        let mut state = self.state.lock();
        if let Some(resp) = state.retry_response.take() {
            return Ok(resp);
        }

        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| ApiError::NotFound("Split plan not found".to_string()))?;
        let mut results = Vec::new();
        for action in plan.actions.iter_mut().filter(|a| !a.executed) {
            action.executed = true;
            results.push(ActionExecutionResult {
                action_id: Some(action.id.clone()),
                bucket_id: action.bucket_id.clone(),
                status: ActionResultStatus::Completed,
                amount: action.amount,
                error: None,
                external_url: None,
                transaction_id: None,
            });
        }
        Ok(SplitExecutionResponse {
            plan_id: plan.id.clone(),
            status: "completed".to_string(),
            total_amount: plan.total_amount,
            completed_amount: results.iter().map(|r| r.amount).sum(),
            failed_amount: 0.0,
            manual_amount: 0.0,
            action_results: results,
            completed_at: None,
        })
    }
}

impl BucketApi for MockApi {
    async fn get_buckets(&self) -> Result<Vec<Bucket>, ApiError> {
        self.log("get_buckets".to_string());
        Ok(self.state.lock().buckets.clone())
    }

    async fn reorder_buckets(&self, bucket_ids: &[String]) -> Result<Vec<Bucket>, ApiError> {
        self.log(format!("reorder {}", bucket_ids.join(",")));
        let mut state = self.state.lock();
        if state.reject_reorder {
            return Err(ApiError::Status {
                status: 400,
                detail: "Invalid bucket order".to_string(),
            });
        }

        // listed buckets first, the rest keep their relative order
        let mut reordered = state.buckets.clone();
        reordered.sort_by_key(|b| {
            bucket_ids
                .iter()
                .position(|id| id == &b.id)
                .unwrap_or(bucket_ids.len())
        });
        for (i, bucket) in reordered.iter_mut().enumerate() {
            bucket.sort_order = i as i32;
        }
        state.buckets = reordered.clone();
        Ok(reordered)
    }
}
