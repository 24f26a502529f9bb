//! Donut geometry: percentage ↔ angle ↔ point, and touch → handle mapping.
//!
//! 0% sits at 12 o'clock and percentages grow clockwise. Chart coordinates use
//! a 100-unit viewBox; touches arrive in rendered pixels.

use super::AllocationModel;

/// Touch radius around a handle, in rendered pixels
pub const HANDLE_TOUCH_THRESHOLD: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Chart dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DonutLayout {
    /// Rendered width/height in pixels
    pub size: f64,
    pub view_box: f64,
    pub center: f64,
    pub radius: f64,
    pub stroke_width: f64,
    pub handle_radius: f64,
}

impl Default for DonutLayout {
    fn default() -> Self {
        Self {
            size: 280.0,
            view_box: 100.0,
            center: 50.0,
            radius: 40.0,
            stroke_width: 12.0,
            handle_radius: 6.0,
        }
    }
}

impl DonutLayout {
    /// Pixels per viewBox unit
    pub fn scale(&self) -> f64 {
        self.size / self.view_box
    }

    /// Center of the rendered chart, in pixels
    pub fn pixel_center(&self) -> Point {
        Point::new(self.size / 2.0, self.size / 2.0)
    }

    /// Handle position for a split point, in pixels
    pub fn handle_position(&self, split_point: f64) -> Point {
        let p = point_on_circle(self.center, self.radius, split_point);
        let scale = self.scale();
        Point::new(p.x * scale, p.y * scale)
    }

    /// Percentage under a touch at pixel coordinates
    pub fn touch_to_percentage(&self, touch: Point) -> f64 {
        let c = self.pixel_center();
        let angle = (touch.y - c.y).atan2(touch.x - c.x).to_degrees();
        angle_to_percentage(angle)
    }

    /// Closest split-point handle within the touch threshold, if any
    pub fn nearest_handle(&self, split_points: &[f64], touch: Point) -> Option<usize> {
        split_points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, self.handle_position(*p).distance(touch)))
            .filter(|(_, d)| *d < HANDLE_TOUCH_THRESHOLD)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

/// Degrees, with 0% at -90° (12 o'clock)
pub fn percentage_to_angle(percentage: f64) -> f64 {
    percentage / 100.0 * 360.0 - 90.0
}

/// Inverse of [`percentage_to_angle`], normalized to [0, 100)
pub fn angle_to_percentage(angle: f64) -> f64 {
    let adjusted = (angle + 90.0).rem_euclid(360.0);
    adjusted / 3.6
}

pub fn point_on_circle(center: f64, radius: f64, percentage: f64) -> Point {
    let radians = percentage_to_angle(percentage).to_radians();
    Point::new(
        center + radius * radians.cos(),
        center + radius * radians.sin(),
    )
}

/// Label anchor between two boundaries
pub fn midpoint_percentage(start: f64, end: f64) -> f64 {
    start + (end - start) / 2.0
}

/// A single pan gesture over the chart.
///
/// `begin` picks the handle under the finger; each `update` maps the sample
/// to a percentage and moves that handle. Touches that start away from every
/// handle are ignored for the whole gesture.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleDrag {
    active: Option<usize>,
}

impl HandleDrag {
    pub fn begin(&mut self, layout: &DonutLayout, model: &AllocationModel, touch: Point) -> Option<usize> {
        self.active = layout.nearest_handle(&model.split_points(), touch);
        self.active
    }

    pub fn update(&self, layout: &DonutLayout, model: &mut AllocationModel, touch: Point) {
        if let Some(handle) = self.active {
            model.update_split_point(handle, layout.touch_to_percentage(touch));
        }
    }

    pub fn end(&mut self) {
        self.active = None;
    }

    pub fn active_handle(&self) -> Option<usize> {
        self.active
    }
}
