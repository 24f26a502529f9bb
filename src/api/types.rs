//! Backend wire types (JSON, snake_case as served).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    Percentage,
    Fixed,
}

/// A user-configured destination for part of each deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub bucket_type: BucketType,
    /// Percent for percentage buckets, currency amount for fixed buckets
    pub allocation_value: f64,
    #[serde(default)]
    pub target_amount: Option<f64>,
    #[serde(default)]
    pub current_balance: f64,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub amount: f64,
    pub status: DepositStatus,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::PendingApproval => "pending_approval",
            PlanStatus::Approved => "approved",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Cancelled => "cancelled",
        }
    }

    /// Plan will not change any further
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Cancelled)
    }
}

/// One transfer within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAction {
    pub id: String,
    pub split_plan_id: String,
    pub bucket_id: String,
    pub amount: f64,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub id: String,
    pub deposit_id: String,
    pub total_amount: f64,
    pub status: PlanStatus,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<SplitAction>,
}

impl SplitPlan {
    pub fn action_for_bucket(&self, bucket_id: &str) -> Option<&SplitAction> {
        self.actions.iter().find(|a| a.bucket_id == bucket_id)
    }

    /// Completed, or every action already executed
    pub fn is_settled(&self) -> bool {
        self.status == PlanStatus::Completed
            || (!self.actions.is_empty() && self.actions.iter().all(|a| a.executed))
    }
}

/// `{bucket_id, amount}` pair used by previews and plan creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanActionInput {
    pub bucket_id: String,
    pub amount: f64,
}

/// Proposed, unsaved allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlanPreview {
    pub deposit_id: String,
    pub total_amount: f64,
    pub actions: Vec<PlanActionInput>,
}

/// Body of `POST /split-plans`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSplitPlan {
    pub deposit_id: String,
    pub total_amount: f64,
    pub actions: Vec<PlanActionInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    ManualRequired,
}

impl ActionResultStatus {
    /// Counts as done for the plan (manual actions are handed to the user)
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            ActionResultStatus::Completed | ActionResultStatus::ManualRequired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecutionResult {
    #[serde(default)]
    pub action_id: Option<String>,
    pub bucket_id: String,
    pub status: ActionResultStatus,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Response of execute/retry endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitExecutionResponse {
    pub plan_id: String,
    pub status: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub completed_amount: f64,
    #[serde(default)]
    pub failed_amount: f64,
    #[serde(default)]
    pub manual_amount: f64,
    #[serde(default)]
    pub action_results: Vec<ActionExecutionResult>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SplitExecutionResponse {
    pub fn is_complete(&self) -> bool {
        self.action_results.iter().all(|r| r.status.is_done())
    }
}

/// Body of `POST /buckets/reorder`
#[derive(Debug, Clone, Serialize)]
pub struct ReorderBuckets<'a> {
    pub bucket_ids: &'a [String],
}
