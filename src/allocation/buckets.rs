//! Bucket → segment conversion.

use crate::api::types::{Bucket, BucketType};

use super::{Segment, DEFAULT_SEGMENT_COLOR};

/// Build one segment per active bucket, ordered by `sort_order`.
///
/// Percentage buckets contribute their `allocation_value`. Fixed buckets are
/// expressed as the share of `deposit_amount` they would take (capped at the
/// whole deposit). Nothing is clamped to the minimum segment size here.
pub fn segments_from_buckets(buckets: &[Bucket], deposit_amount: f64) -> Vec<Segment> {
    let mut active: Vec<&Bucket> = buckets.iter().filter(|b| b.is_active).collect();
    active.sort_by_key(|b| b.sort_order);

    active
        .into_iter()
        .map(|bucket| {
            let percentage = match bucket.bucket_type {
                BucketType::Percentage => bucket.allocation_value,
                BucketType::Fixed if deposit_amount > 0.0 => {
                    bucket.allocation_value.min(deposit_amount) / deposit_amount * 100.0
                }
                BucketType::Fixed => 0.0,
            };
            Segment {
                id: bucket.id.clone(),
                name: bucket.name.clone(),
                percentage,
                color: bucket
                    .color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SEGMENT_COLOR.to_string()),
            }
        })
        .collect()
}
