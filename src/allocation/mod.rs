//! Allocation Model
//!
//! Percentage partition of a deposit across ordered, named segments plus an
//! implicit remainder. Two mutation primitives back the editing UIs:
//! - direct percentage entry (`update_segment_percentage`)
//! - split-point dragging (`update_split_point`)
//!
//! Edits never fail. Out-of-range input is clamped silently so that every
//! segment keeps at least `MIN_SEGMENT_SIZE` percent.

pub mod buckets;
pub mod geometry;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use buckets::segments_from_buckets;

/// Minimum size of a segment, in percent
pub const MIN_SEGMENT_SIZE: f64 = 5.0;

/// Color used when a bucket has none configured
pub const DEFAULT_SEGMENT_COLOR: &str = "#0EA5A5";

/// Tolerance used when comparing percentage sums
pub const PERCENT_EPSILON: f64 = 1e-6;

/// One bucket's share of a deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub percentage: f64,
    pub color: String,
}

impl Segment {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        percentage: f64,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            percentage,
            color: color.into(),
        }
    }
}

/// Monetary amount for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAmount {
    pub id: String,
    pub amount: f64,
}

/// Reasons a segment list cannot be submitted as a plan
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationIssue {
    #[error("segment {id} is {percentage}%, below the {min}% minimum")]
    BelowMinimum { id: String, percentage: f64, min: f64 },
    #[error("segments total {total}%, more than 100%")]
    OverAllocated { total: f64 },
}

type SegmentsListener = Box<dyn FnMut(&[Segment]) + Send>;

/// Editable percentage partition
pub struct AllocationModel {
    segments: Vec<Segment>,
    initial: Vec<Segment>,
    listener: Option<SegmentsListener>,
}

impl fmt::Debug for AllocationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationModel")
            .field("segments", &self.segments)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl AllocationModel {
    /// Build a model from an initial segment list.
    ///
    /// The list is taken as-is: values that already violate the minimum size
    /// or the 100% total are not corrected until they are edited.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            initial: segments.clone(),
            segments,
            listener: None,
        }
    }

    /// Register the listener that receives the full segment list after every edit
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&[Segment]) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Cumulative boundaries: `split_points[i]` is the end of segment `i`
    pub fn split_points(&self) -> Vec<f64> {
        self.segments
            .iter()
            .scan(0.0, |acc, s| {
                *acc += s.percentage;
                Some(*acc)
            })
            .collect()
    }

    pub fn total_percentage(&self) -> f64 {
        self.segments.iter().map(|s| s.percentage).sum()
    }

    /// Unallocated share, floored at zero
    pub fn remainder(&self) -> f64 {
        (100.0 - self.total_percentage()).max(0.0)
    }

    /// Per-segment amounts for a deposit of `total`
    pub fn segment_amounts(&self, total: f64) -> Vec<SegmentAmount> {
        self.segments
            .iter()
            .map(|s| SegmentAmount {
                id: s.id.clone(),
                amount: percent_of(total, s.percentage),
            })
            .collect()
    }

    pub fn remainder_amount(&self, total: f64) -> f64 {
        percent_of(total, self.remainder())
    }

    /// Set one segment's percentage directly.
    ///
    /// Only `segments[index]` changes. The value is clamped so that every other
    /// segment can still hold the minimum and the remainder never goes negative.
    pub fn update_segment_percentage(&mut self, index: usize, new_percentage: f64) {
        if index >= self.segments.len() || !new_percentage.is_finite() {
            return;
        }

        let n = self.segments.len() as f64;
        let others: f64 = self
            .segments
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, s)| s.percentage)
            .sum();
        let upper = (100.0 - (n - 1.0) * MIN_SEGMENT_SIZE).min(100.0 - others);
        let clamped = new_percentage.min(upper).max(MIN_SEGMENT_SIZE);

        self.segments[index].percentage = clamped;
        tracing::trace!(index, percentage = clamped, "segment percentage updated");
        self.notify();
    }

    /// Move the boundary at the end of segment `handle_index`.
    ///
    /// Trades size between segment `handle_index` and its successor (or the
    /// remainder for the last handle). Every other boundary stays put.
    pub fn update_split_point(&mut self, handle_index: usize, new_point: f64) {
        let n = self.segments.len();
        if handle_index >= n || !new_point.is_finite() {
            return;
        }

        let points = self.split_points();
        let last = n - 1;

        let previous = if handle_index == 0 {
            0.0
        } else {
            points[handle_index - 1]
        };
        let min_point = previous + MIN_SEGMENT_SIZE;
        let max_point = if handle_index == last {
            100.0 - MIN_SEGMENT_SIZE
        } else {
            points[handle_index + 1] - MIN_SEGMENT_SIZE
        };

        // min wins when the bounds cross (only possible with unclamped initial data)
        let clamped = new_point.min(max_point).max(min_point);

        self.segments[handle_index].percentage = clamped - previous;
        if handle_index < last {
            self.segments[handle_index + 1].percentage = points[handle_index + 1] - clamped;
        }

        tracing::trace!(handle_index, point = clamped, "split point moved");
        self.notify();
    }

    /// Set the percentage of the segment with the given id
    pub fn update_segment_by_id(&mut self, id: &str, new_percentage: f64) {
        if let Some(index) = self.segments.iter().position(|s| s.id == id) {
            self.update_segment_percentage(index, new_percentage);
        }
    }

    /// Replace the whole segment list (e.g. after reloading buckets)
    pub fn replace_segments(&mut self, segments: Vec<Segment>) {
        self.initial = segments.clone();
        self.segments = segments;
        self.notify();
    }

    /// Restore the segments the model was created with
    pub fn reset(&mut self) {
        self.segments = self.initial.clone();
        self.notify();
    }

    /// Check the list is submittable: every segment at or above the minimum and
    /// the total not above 100%.
    pub fn validate(&self) -> Result<(), AllocationIssue> {
        validate_segments(&self.segments)
    }

    fn notify(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.segments);
        }
    }
}

/// Validate a segment list without building a model
pub fn validate_segments(segments: &[Segment]) -> Result<(), AllocationIssue> {
    if let Some(s) = segments
        .iter()
        .find(|s| s.percentage + PERCENT_EPSILON < MIN_SEGMENT_SIZE)
    {
        return Err(AllocationIssue::BelowMinimum {
            id: s.id.clone(),
            percentage: s.percentage,
            min: MIN_SEGMENT_SIZE,
        });
    }

    let total: f64 = segments.iter().map(|s| s.percentage).sum();
    if total > 100.0 + PERCENT_EPSILON {
        return Err(AllocationIssue::OverAllocated { total });
    }

    Ok(())
}

/// `total * percentage / 100`
pub fn percent_of(total: f64, percentage: f64) -> f64 {
    total * percentage / 100.0
}

/// Round a monetary amount to cents
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
