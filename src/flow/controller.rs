//! Split-flow controller: guarded step transitions, sequential execution,
//! user-initiated retry and cooperative cancel.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::{Allocation, BucketStatus, ExecutionStatus, FlowState, FlowStep, SourceAccount};
use super::{CancelHandle, FlowError, TransferExecutor, CANCELLED_MESSAGE};
use crate::allocation::{segments_from_buckets, AllocationModel, Segment};
use crate::api::types::{Bucket, Deposit};

/// Default pause before moving to the complete step after a clean run
pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(800);

/// Result of a back/exit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Moved to this step
    Moved(FlowStep),
    /// Flow was reset; the caller returns to the dashboard
    Exited,
    /// Request ignored; still on this step
    Stayed(FlowStep),
}

/// Owns the flow state and the allocation model for one deposit
pub struct SplitFlowController {
    state: FlowState,
    model: AllocationModel,
    cancel: CancelHandle,
    completion_delay: Duration,
    updates: watch::Sender<FlowState>,
}

impl Default for SplitFlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitFlowController {
    pub fn new() -> Self {
        Self::with_completion_delay(DEFAULT_COMPLETION_DELAY)
    }

    pub fn with_completion_delay(completion_delay: Duration) -> Self {
        let state = FlowState::default();
        let (updates, _) = watch::channel(state.clone());
        Self {
            state,
            model: AllocationModel::new(Vec::new()),
            cancel: CancelHandle::new(),
            completion_delay,
            updates,
        }
    }

    /// Resume from a persisted snapshot
    pub fn restore(state: FlowState, completion_delay: Duration) -> Self {
        let mut controller = Self::with_completion_delay(completion_delay);
        let segments: Vec<Segment> = state.allocations.iter().map(Allocation::to_segment).collect();
        controller.model = AllocationModel::new(segments);
        controller.state = state;
        controller.publish();
        controller
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn allocation(&self) -> &AllocationModel {
        &self.model
    }

    pub fn current_step(&self) -> FlowStep {
        self.state.current_step
    }

    /// Snapshots published after every mutation
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.updates.subscribe()
    }

    /// Handle another task can use to stop a running pass
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn can_proceed(&self) -> bool {
        self.state.can_proceed()
    }

    pub fn total_allocated(&self) -> f64 {
        self.state.total_allocated()
    }

    // =================== Setup ===================

    /// Begin a split for a manually entered amount
    pub fn start_flow(&mut self, amount: f64, source: Option<SourceAccount>) -> Result<(), FlowError> {
        let deposit_id = format!("deposit-{}", uuid::Uuid::new_v4());
        self.begin(deposit_id, amount, source)
    }

    /// Begin a split for a deposit the backend already knows about
    pub fn start_from_deposit(
        &mut self,
        deposit: &Deposit,
        source: Option<SourceAccount>,
    ) -> Result<(), FlowError> {
        self.begin(deposit.id.clone(), deposit.amount, source)
    }

    fn begin(
        &mut self,
        deposit_id: String,
        amount: f64,
        source: Option<SourceAccount>,
    ) -> Result<(), FlowError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(FlowError::InvalidAmount);
        }

        self.cancel.reset();
        self.state = FlowState {
            deposit_id: Some(deposit_id),
            deposit_amount: amount,
            source_account: source,
            remainder: amount,
            ..FlowState::default()
        };
        self.model = AllocationModel::new(Vec::new());

        info!(
            deposit_id = ?self.state.deposit_id,
            amount,
            "split flow started"
        );
        self.publish();
        Ok(())
    }

    pub fn select_source(&mut self, source: SourceAccount) {
        self.state.source_account = Some(source);
        self.publish();
    }

    /// Seed the allocation model from the user's buckets
    pub fn load_buckets(&mut self, buckets: &[Bucket]) {
        let segments = segments_from_buckets(buckets, self.state.deposit_amount);
        self.set_segments(segments);
    }

    pub fn set_segments(&mut self, segments: Vec<Segment>) {
        self.model.replace_segments(segments);
        self.sync_allocations();
    }

    /// setup → allocate
    pub fn continue_to_allocate(&mut self) -> Result<(), FlowError> {
        self.expect_step(FlowStep::Setup, FlowStep::Allocate)?;
        if self.state.deposit_amount <= 0.0 {
            return Err(FlowError::InvalidAmount);
        }
        if self.state.source_account.is_none() {
            return Err(FlowError::NoSourceAccount);
        }
        self.go_to(FlowStep::Allocate);
        Ok(())
    }

    // =================== Allocate ===================

    pub fn update_segment_percentage(&mut self, index: usize, percentage: f64) {
        if !self.editable() {
            return;
        }
        self.model.update_segment_percentage(index, percentage);
        self.sync_allocations();
    }

    pub fn update_split_point(&mut self, handle_index: usize, point: f64) {
        if !self.editable() {
            return;
        }
        self.model.update_split_point(handle_index, point);
        self.sync_allocations();
    }

    pub fn update_allocation(&mut self, bucket_id: &str, percentage: f64) {
        if !self.editable() {
            return;
        }
        self.model.update_segment_by_id(bucket_id, percentage);
        self.sync_allocations();
    }

    pub fn reset_allocations(&mut self) {
        if !self.editable() {
            return;
        }
        self.model.reset();
        self.sync_allocations();
    }

    /// allocate → confirm
    pub fn proceed_to_confirm(&mut self) -> Result<(), FlowError> {
        self.expect_step(FlowStep::Allocate, FlowStep::Confirm)?;
        if self.state.allocations.is_empty() {
            return Err(FlowError::NoAllocations);
        }
        self.model.validate()?;
        self.go_to(FlowStep::Confirm);
        Ok(())
    }

    // =================== Execution ===================

    /// confirm → processing, then run every bucket in order.
    ///
    /// Returns the aggregate outcome. A partial outcome leaves the flow on the
    /// processing step for a retry or `continue_anyway`.
    pub async fn confirm_split<E: TransferExecutor>(
        &mut self,
        executor: &E,
    ) -> Result<ExecutionStatus, FlowError> {
        self.expect_step(FlowStep::Confirm, FlowStep::Processing)?;
        let deposit_id = self.state.deposit_id.clone().ok_or(FlowError::NoDeposit)?;
        if self.state.allocations.is_empty() {
            return Err(FlowError::NoAllocations);
        }
        self.model.validate()?;

        self.cancel.reset();
        self.state.error = None;
        self.state.is_submitting = true;
        self.publish();

        let allocations = self.state.allocations.clone();
        if let Err(e) = executor
            .prepare(&deposit_id, self.state.deposit_amount, &allocations)
            .await
        {
            return Err(self.fail_request(&deposit_id, e));
        }

        self.go_to(FlowStep::Processing);
        self.state.execution_status = ExecutionStatus::Executing;
        self.state.has_partial_failure = false;
        self.state.processing_statuses.clear();
        self.state.processing_errors.clear();
        for allocation in &allocations {
            self.state.set_status(&allocation.bucket_id, BucketStatus::Pending, None);
        }
        self.publish();

        info!(deposit_id = %deposit_id, buckets = allocations.len(), "executing split");
        self.run_pass(executor, &deposit_id, &allocations).await;
        Ok(self.settle(&deposit_id).await)
    }

    /// Re-run only the buckets that ended in error
    pub async fn retry<E: TransferExecutor>(
        &mut self,
        executor: &E,
    ) -> Result<ExecutionStatus, FlowError> {
        if self.state.current_step != FlowStep::Processing {
            return Err(FlowError::InvalidTransition {
                from: self.state.current_step,
                to: FlowStep::Processing,
            });
        }
        let deposit_id = self.state.deposit_id.clone().ok_or(FlowError::NoDeposit)?;

        let failed = self.state.failed_allocations();
        if failed.is_empty() {
            return Ok(self.state.execution_status);
        }

        self.cancel.reset();
        self.state.error = None;
        self.state.is_submitting = true;
        self.publish();

        if let Err(e) = executor.prepare_retry(&deposit_id, &failed).await {
            return Err(self.fail_request(&deposit_id, e));
        }

        for allocation in &failed {
            self.state.set_status(&allocation.bucket_id, BucketStatus::Pending, None);
        }
        self.state.execution_status = ExecutionStatus::Executing;
        self.publish();

        info!(deposit_id = %deposit_id, buckets = failed.len(), "retrying failed buckets");
        self.run_pass(executor, &deposit_id, &failed).await;
        Ok(self.settle(&deposit_id).await)
    }

    /// Stop the current run: open buckets become `error: Cancelled`
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.apply_cancel();
        self.publish();
    }

    /// Accept a partial outcome and move on to the complete step
    pub fn continue_anyway(&mut self) -> Result<(), FlowError> {
        self.expect_step(FlowStep::Processing, FlowStep::Complete)?;
        if self.state.execution_status != ExecutionStatus::Partial {
            return Err(FlowError::InvalidTransition {
                from: FlowStep::Processing,
                to: FlowStep::Complete,
            });
        }
        self.finish();
        Ok(())
    }

    async fn run_pass<E: TransferExecutor>(
        &mut self,
        executor: &E,
        deposit_id: &str,
        allocations: &[Allocation],
    ) {
        for allocation in allocations {
            if self.cancel.is_cancelled() {
                break;
            }

            let bucket_id = allocation.bucket_id.as_str();
            self.state.set_status(bucket_id, BucketStatus::Processing, None);
            self.publish();

            let result = executor.transfer(deposit_id, allocation, &self.cancel).await;

            // a cancel during the transfer discards its outcome
            if self.cancel.is_cancelled() {
                break;
            }

            match result {
                Ok(()) => {
                    debug!(bucket_id, amount = allocation.amount, "bucket transfer complete");
                    self.state.set_status(bucket_id, BucketStatus::Complete, None);
                }
                Err(reason) => {
                    warn!(bucket_id, reason = %reason, "bucket transfer failed");
                    self.state.set_status(bucket_id, BucketStatus::Error, Some(reason));
                }
            }
            self.publish();
        }

        if self.cancel.is_cancelled() {
            info!(deposit_id, "split run cancelled");
            self.apply_cancel();
            self.publish();
        }
    }

    /// Aggregate statuses once every bucket in the pass has settled
    async fn settle(&mut self, deposit_id: &str) -> ExecutionStatus {
        self.state.is_submitting = false;

        if self.state.all_complete() {
            self.state.execution_status = ExecutionStatus::Complete;
            self.state.has_partial_failure = false;
            self.publish();
            info!(deposit_id, "split complete");

            if !self.completion_delay.is_zero() {
                tokio::time::sleep(self.completion_delay).await;
            }
            self.finish();
        } else {
            self.state.execution_status = ExecutionStatus::Partial;
            self.state.has_partial_failure = true;
            self.publish();
            warn!(
                deposit_id,
                completed = self.state.completed_count(),
                failed = self.state.failed_count(),
                "split finished with failures"
            );
        }

        self.state.execution_status
    }

    fn apply_cancel(&mut self) {
        let open: Vec<String> = self
            .state
            .processing_statuses
            .iter()
            .filter(|(_, s)| s.is_open())
            .map(|(id, _)| id.clone())
            .collect();
        for bucket_id in open {
            self.state.set_status(
                &bucket_id,
                BucketStatus::Error,
                Some(CANCELLED_MESSAGE.to_string()),
            );
        }
        self.state.execution_status = ExecutionStatus::Partial;
        self.state.has_partial_failure = true;
        self.state.is_submitting = false;
    }

    /// Record a failed network call for the current screen
    fn fail_request(&mut self, deposit_id: &str, err: crate::api::ApiError) -> FlowError {
        self.state.is_submitting = false;

        if err.is_not_found() {
            warn!(deposit_id, error = %err, "split plan not found, leaving flow");
            self.exit_flow();
            return FlowError::PlanNotFound(deposit_id.to_string());
        }

        warn!(deposit_id, error = %err, "split request failed");
        self.state.error = Some(err.to_string());
        self.publish();
        FlowError::Api(err)
    }

    fn finish(&mut self) {
        self.state.completed_at = Some(Utc::now());
        self.state.is_submitting = false;
        self.go_to(FlowStep::Complete);
    }

    // =================== Navigation ===================

    /// Step back; leaves the flow from setup; ignored once execution started
    pub fn go_back(&mut self) -> Navigation {
        let step = self.state.current_step;
        if !step.can_go_back() {
            debug!(step = %step, "back navigation ignored");
            return Navigation::Stayed(step);
        }

        match step.previous() {
            Some(previous) => {
                self.go_to(previous);
                Navigation::Moved(previous)
            }
            None => {
                self.exit_flow();
                Navigation::Exited
            }
        }
    }

    /// Drop all flow state
    pub fn exit_flow(&mut self) {
        self.cancel.cancel();
        self.state = FlowState::default();
        self.model = AllocationModel::new(Vec::new());
        info!("split flow exited");
        self.publish();
    }

    fn editable(&self) -> bool {
        matches!(
            self.state.current_step,
            FlowStep::Setup | FlowStep::Allocate | FlowStep::Confirm
        )
    }

    fn expect_step(&self, from: FlowStep, to: FlowStep) -> Result<(), FlowError> {
        if self.state.current_step != from {
            return Err(FlowError::InvalidTransition {
                from: self.state.current_step,
                to,
            });
        }
        Ok(())
    }

    fn go_to(&mut self, step: FlowStep) {
        debug!(from = %self.state.current_step, to = %step, "flow step");
        self.state.current_step = step;
        self.publish();
    }

    fn sync_allocations(&mut self) {
        self.state.set_allocations_from(self.model.segments());
        self.publish();
    }

    fn publish(&self) {
        self.updates.send_replace(self.state.clone());
    }
}
