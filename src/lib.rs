//! FlowSplit client core: deposit allocation math, the split-flow state
//! machine, and the backend client it drives.

pub mod allocation;
pub mod api;
pub mod buckets;
pub mod config;
pub mod flow;
pub mod links;
pub mod store;

pub use allocation::{AllocationModel, Segment, MIN_SEGMENT_SIZE};
pub use api::{ApiClient, ApiError};
pub use config::ClientConfig;
pub use flow::{FlowError, FlowState, FlowStep, SplitFlowController};
