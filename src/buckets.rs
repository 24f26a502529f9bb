//! Local bucket list: sorted by `sort_order`, refreshed from the backend,
//! reordered optimistically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::types::{Bucket, BucketType};
use crate::api::{ApiError, BucketApi};

/// Persisted part of the bucket list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub buckets: Vec<Bucket>,
    pub last_fetched: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct BucketBook {
    buckets: Vec<Bucket>,
    last_fetched: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl BucketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BucketSnapshot) -> Self {
        let mut book = Self::new();
        book.buckets = snapshot.buckets;
        book.buckets.sort_by_key(|b| b.sort_order);
        book.last_fetched = snapshot.last_fetched;
        book
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            buckets: self.buckets.clone(),
            last_fetched: self.last_fetched,
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.last_fetched
    }

    /// Replace the list with a fresh server copy
    pub fn set_buckets(&mut self, mut buckets: Vec<Bucket>) {
        buckets.sort_by_key(|b| b.sort_order);
        self.buckets = buckets;
        self.error = None;
        self.last_fetched = Some(Utc::now());
    }

    pub fn get(&self, bucket_id: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.id == bucket_id)
    }

    pub fn active(&self) -> Vec<&Bucket> {
        self.buckets.iter().filter(|b| b.is_active).collect()
    }

    /// Sum of active percentage buckets
    pub fn total_percentage_allocation(&self) -> f64 {
        self.buckets
            .iter()
            .filter(|b| b.is_active && b.bucket_type == BucketType::Percentage)
            .map(|b| b.allocation_value)
            .sum()
    }

    /// Apply an order locally. Listed buckets come first in the given order;
    /// unknown ids are skipped and unlisted buckets follow in their current order.
    pub fn reorder_local(&mut self, bucket_ids: &[String]) {
        let mut listed: Vec<Bucket> = Vec::with_capacity(self.buckets.len());
        for id in bucket_ids {
            if listed.iter().any(|b| &b.id == id) {
                continue;
            }
            if let Some(bucket) = self.get(id) {
                listed.push(bucket.clone());
            }
        }
        let unlisted: Vec<Bucket> = self
            .buckets
            .iter()
            .filter(|b| !listed.iter().any(|l| l.id == b.id))
            .cloned()
            .collect();

        self.buckets = listed
            .into_iter()
            .chain(unlisted)
            .enumerate()
            .map(|(index, bucket)| Bucket {
                sort_order: index as i32,
                ..bucket
            })
            .collect();
    }

    /// Fetch the list from the backend
    pub async fn refresh<A: BucketApi>(&mut self, api: &A) -> Result<(), ApiError> {
        match api.get_buckets().await {
            Ok(buckets) => {
                info!(count = buckets.len(), "buckets refreshed");
                self.set_buckets(buckets);
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Reorder optimistically; the backend's list replaces the local one on
    /// success, and the previous order is restored if it rejects the change.
    pub async fn reorder<A: BucketApi>(
        &mut self,
        api: &A,
        bucket_ids: &[String],
    ) -> Result<(), ApiError> {
        let previous = self.buckets.clone();
        self.reorder_local(bucket_ids);
        self.error = None;

        match api.reorder_buckets(bucket_ids).await {
            Ok(buckets) => {
                self.set_buckets(buckets);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "bucket reorder rejected, restoring previous order");
                self.buckets = previous;
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
