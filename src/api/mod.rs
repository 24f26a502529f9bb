//! Backend API surface consumed by the split flow.
//!
//! The traits are the seam between the flow and the network: the production
//! implementation is [`client::ApiClient`]; tests provide in-memory backends.
#![allow(async_fn_in_trait)]

pub mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

use thiserror::Error;

pub use client::ApiClient;
use types::{
    Bucket, CreateSplitPlan, Deposit, SplitExecutionResponse, SplitPlan, SplitPlanPreview,
};

/// Errors returned by the backend API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// 404 from the backend
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-2xx response; `detail` is the server's message or `HTTP <status>`
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The deposit already has a plan whose actions differ from the confirmed split
    #[error("split plan {plan_id} ({status}) does not match the confirmed split: {detail}")]
    PlanMismatch {
        plan_id: String,
        status: String,
        detail: String,
    },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid api url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound(_) => Some(404),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Deposit and split-plan endpoints
pub trait PlanApi {
    async fn pending_deposits(&self) -> Result<Vec<Deposit>, ApiError>;
    async fn get_deposit(&self, deposit_id: &str) -> Result<Deposit, ApiError>;
    async fn preview_split_plan(&self, deposit_id: &str) -> Result<SplitPlanPreview, ApiError>;
    async fn create_split_plan(&self, body: &CreateSplitPlan) -> Result<SplitPlan, ApiError>;
    async fn approve_split_plan(&self, plan_id: &str) -> Result<SplitPlan, ApiError>;
    async fn split_plan_by_deposit(&self, deposit_id: &str) -> Result<SplitPlan, ApiError>;
    async fn retry_split_plan(&self, plan_id: &str) -> Result<SplitExecutionResponse, ApiError>;
}

/// Bucket endpoints
pub trait BucketApi {
    async fn get_buckets(&self) -> Result<Vec<Bucket>, ApiError>;
    async fn reorder_buckets(&self, bucket_ids: &[String]) -> Result<Vec<Bucket>, ApiError>;
}
