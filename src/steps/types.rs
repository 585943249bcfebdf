//! Step descriptors and on-screen geometry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a step: the tour it belongs to plus its id within that tour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub tour_id: String,
    pub step_id: String,
}

impl StepKey {
    pub fn new(tour_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            tour_id: tour_id.into(),
            step_id: step_id.into(),
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tour_id, self.step_id)
    }
}

/// Placement hint for the overlay relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Top,
    Bottom,
}

/// Metadata a UI element declares for the step it anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub tour_id: String,
    pub step_id: String,
    /// Traversal position; unique within a tour
    pub order: i32,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub side: Option<Side>,
}

impl StepDescriptor {
    pub fn new(
        tour_id: impl Into<String>,
        step_id: impl Into<String>,
        order: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            tour_id: tour_id.into(),
            step_id: step_id.into(),
            order,
            text: text.into(),
            title: None,
            side: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(&self.tour_id, &self.step_id)
    }

    /// Take the presentation fields of a newer registration, keeping identity and order.
    pub(crate) fn refresh_from(&mut self, newer: &StepDescriptor) {
        self.text.clone_from(&newer.text);
        self.title.clone_from(&newer.title);
        self.side = newer.side;
    }
}

/// Anchor geometry in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepLayout {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl StepLayout {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// All-zero geometry is what the platform reports before its first layout pass.
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.width == 0.0 && self.height == 0.0
    }

    /// Whether this layout may be shown to the user.
    pub fn is_resolved(&self) -> bool {
        !self.is_zero()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    pub fn offset_y(&self, dy: f32) -> Self {
        Self {
            y: self.y + dy,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_layout_is_unresolved() {
        assert!(StepLayout::default().is_zero());
        assert!(!StepLayout::default().is_resolved());
    }

    #[test]
    fn test_layout_at_origin_with_size_is_resolved() {
        let layout = StepLayout::new(0.0, 0.0, 120.0, 40.0);
        assert!(!layout.is_zero());
        assert!(layout.is_resolved());
    }

    #[test]
    fn test_nan_layout_is_unresolved() {
        let layout = StepLayout::new(f32::NAN, 10.0, 20.0, 20.0);
        assert!(!layout.is_resolved());
    }

    #[test]
    fn test_offset_y_only_moves_vertically() {
        let layout = StepLayout::new(5.0, 10.0, 20.0, 30.0).offset_y(24.0);
        assert_eq!(layout, StepLayout::new(5.0, 34.0, 20.0, 30.0));
    }

    #[test]
    fn test_refresh_keeps_order_and_identity() {
        let mut cached = StepDescriptor::new("home", "a", 1, "old");
        let newer = StepDescriptor::new("home", "a", 9, "new")
            .with_title("Title")
            .with_side(Side::Bottom);

        cached.refresh_from(&newer);

        assert_eq!(cached.order, 1);
        assert_eq!(cached.text, "new");
        assert_eq!(cached.title.as_deref(), Some("Title"));
        assert_eq!(cached.side, Some(Side::Bottom));
    }

    #[test]
    fn test_side_serializes_snake_case() {
        let json = serde_json::to_string(&Side::Bottom).unwrap();
        assert_eq!(json, "\"bottom\"");
    }
}
