//! Flow state: the snapshot the split wizard renders from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::allocation::{percent_of, Segment};

/// Wizard steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowStep {
    #[default]
    Setup,
    Allocate,
    Confirm,
    Processing,
    Complete,
}

impl FlowStep {
    pub const ORDER: [FlowStep; 5] = [
        FlowStep::Setup,
        FlowStep::Allocate,
        FlowStep::Confirm,
        FlowStep::Processing,
        FlowStep::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Setup => "setup",
            FlowStep::Allocate => "allocate",
            FlowStep::Confirm => "confirm",
            FlowStep::Processing => "processing",
            FlowStep::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ORDER.iter().copied().find(|step| step.as_str() == s)
    }

    /// Back navigation is only offered before execution starts
    pub fn can_go_back(&self) -> bool {
        matches!(self, FlowStep::Setup | FlowStep::Allocate | FlowStep::Confirm)
    }

    /// Step that `go_back` leads to; `None` from setup means leaving the flow
    pub fn previous(&self) -> Option<FlowStep> {
        match self {
            FlowStep::Allocate => Some(FlowStep::Setup),
            FlowStep::Confirm => Some(FlowStep::Allocate),
            _ => None,
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-bucket execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl BucketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketStatus::Pending => "pending",
            BucketStatus::Processing => "processing",
            BucketStatus::Complete => "complete",
            BucketStatus::Error => "error",
        }
    }

    /// Still waiting on a transfer
    pub fn is_open(&self) -> bool {
        matches!(self, BucketStatus::Pending | BucketStatus::Processing)
    }
}

/// Aggregate outcome of an execution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Executing,
    Complete,
    Partial,
}

/// Account the deposit is split from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAccount {
    pub id: String,
    pub name: String,
}

impl SourceAccount {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A bucket's share of the deposit in money terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub bucket_id: String,
    pub bucket_name: String,
    pub percentage: f64,
    pub amount: f64,
    pub color: String,
}

impl Allocation {
    pub fn from_segment(segment: &Segment, deposit_amount: f64) -> Self {
        Self {
            bucket_id: segment.id.clone(),
            bucket_name: segment.name.clone(),
            percentage: segment.percentage,
            amount: percent_of(deposit_amount, segment.percentage),
            color: segment.color.clone(),
        }
    }

    pub fn to_segment(&self) -> Segment {
        Segment::new(
            self.bucket_id.clone(),
            self.bucket_name.clone(),
            self.percentage,
            self.color.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub current_step: FlowStep,
    pub deposit_id: Option<String>,
    pub deposit_amount: f64,
    pub source_account: Option<SourceAccount>,

    pub allocations: Vec<Allocation>,
    /// Unallocated money
    pub remainder: f64,
    pub remainder_percentage: f64,

    pub is_submitting: bool,
    pub processing_statuses: BTreeMap<String, BucketStatus>,
    pub processing_errors: BTreeMap<String, String>,
    pub execution_status: ExecutionStatus,

    pub has_partial_failure: bool,
    /// Last network/API error for the current screen
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            current_step: FlowStep::Setup,
            deposit_id: None,
            deposit_amount: 0.0,
            source_account: None,
            allocations: Vec::new(),
            remainder: 0.0,
            remainder_percentage: 100.0,
            is_submitting: false,
            processing_statuses: BTreeMap::new(),
            processing_errors: BTreeMap::new(),
            execution_status: ExecutionStatus::Idle,
            has_partial_failure: false,
            error: None,
            completed_at: None,
        }
    }
}

impl FlowState {
    /// Rebuild allocations and remainder from segments
    pub fn set_allocations_from(&mut self, segments: &[Segment]) {
        self.allocations = segments
            .iter()
            .map(|s| Allocation::from_segment(s, self.deposit_amount))
            .collect();
        self.remainder_percentage = (100.0 - self.total_allocated()).max(0.0);
        self.remainder = percent_of(self.deposit_amount, self.remainder_percentage);
    }

    /// Sum of allocation percentages
    pub fn total_allocated(&self) -> f64 {
        self.allocations.iter().map(|a| a.percentage).sum()
    }

    pub fn status_of(&self, bucket_id: &str) -> Option<BucketStatus> {
        self.processing_statuses.get(bucket_id).copied()
    }

    pub fn error_of(&self, bucket_id: &str) -> Option<&str> {
        self.processing_errors.get(bucket_id).map(String::as_str)
    }

    /// Record a bucket status. Leaving the error state clears the old message.
    pub fn set_status(&mut self, bucket_id: &str, status: BucketStatus, error: Option<String>) {
        self.processing_statuses.insert(bucket_id.to_string(), status);
        match (status, error) {
            (BucketStatus::Error, Some(msg)) => {
                self.processing_errors.insert(bucket_id.to_string(), msg);
            }
            (BucketStatus::Error, None) => {}
            _ => {
                self.processing_errors.remove(bucket_id);
            }
        }
    }

    /// Every allocation has a `complete` status
    pub fn all_complete(&self) -> bool {
        !self.allocations.is_empty()
            && self
                .allocations
                .iter()
                .all(|a| self.status_of(&a.bucket_id) == Some(BucketStatus::Complete))
    }

    pub fn completed_count(&self) -> usize {
        self.count(BucketStatus::Complete)
    }

    pub fn failed_count(&self) -> usize {
        self.count(BucketStatus::Error)
    }

    fn count(&self, status: BucketStatus) -> usize {
        self.processing_statuses.values().filter(|s| **s == status).count()
    }

    /// Allocations whose last transfer failed, in plan order
    pub fn failed_allocations(&self) -> Vec<Allocation> {
        self.allocations
            .iter()
            .filter(|a| self.status_of(&a.bucket_id) == Some(BucketStatus::Error))
            .cloned()
            .collect()
    }

    /// Guard for the forward transition out of the current step
    pub fn can_proceed(&self) -> bool {
        match self.current_step {
            FlowStep::Setup => self.deposit_amount > 0.0 && self.source_account.is_some(),
            FlowStep::Allocate => !self.allocations.is_empty(),
            FlowStep::Confirm => true,
            FlowStep::Processing | FlowStep::Complete => false,
        }
    }
}
