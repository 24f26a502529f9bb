//! Split Flow
//!
//! Drives one deposit through setup → allocate → confirm → processing →
//! complete. The controller is the only writer of [`FlowState`]; transfers are
//! delegated to a [`TransferExecutor`]:
//! - [`backend::BackendTransfers`] creates and approves the plan on the server,
//!   then polls the plan resource until each bucket's action has executed
//! - [`simulated::SimulatedTransfers`] / [`simulated::ScriptedTransfers`] stand
//!   in for the server in tests and offline demos
#![allow(async_fn_in_trait)]

pub mod backend;
pub mod controller;
pub mod poller;
pub mod simulated;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::allocation::AllocationIssue;
use crate::api::ApiError;

pub use controller::{Navigation, SplitFlowController};
pub use state::{
    Allocation, BucketStatus, ExecutionStatus, FlowState, FlowStep, SourceAccount,
};

/// Message recorded for buckets stopped by a cancel
pub const CANCELLED_MESSAGE: &str = "Cancelled";

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("deposit amount must be greater than zero")]
    InvalidAmount,
    #[error("select a source account first")]
    NoSourceAccount,
    #[error("add at least one bucket to split into")]
    NoAllocations,
    #[error("no deposit in progress")]
    NoDeposit,
    #[error("invalid allocation: {0}")]
    Allocation(#[from] AllocationIssue),
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: FlowStep, to: FlowStep },
    #[error("split plan not found for deposit {0}")]
    PlanNotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FlowError {
    /// Rejected locally, before any network call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidAmount
                | FlowError::NoSourceAccount
                | FlowError::NoAllocations
                | FlowError::Allocation(_)
        )
    }
}

/// Cooperative cancellation flag shared with whoever may abort a run.
///
/// The execution loop checks it between per-bucket steps; pollers also check
/// it before every request. An in-flight request is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Performs the money movement for one bucket at a time
pub trait TransferExecutor {
    /// Called once before the first pass (e.g. create and approve the plan)
    async fn prepare(
        &self,
        _deposit_id: &str,
        _total_amount: f64,
        _allocations: &[Allocation],
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Called once before a retry pass with the buckets about to be retried
    async fn prepare_retry(&self, _deposit_id: &str, _failed: &[Allocation]) -> Result<(), ApiError> {
        Ok(())
    }

    /// Move one bucket's money. `Err` carries a user-facing reason.
    async fn transfer(
        &self,
        deposit_id: &str,
        allocation: &Allocation,
        cancel: &CancelHandle,
    ) -> Result<(), String>;
}
