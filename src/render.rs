//! Render bridge interface.
//!
//! The engine never draws anything. It publishes a read-only projection of
//! its state after every transition and hands it to each registered bridge.

use tracing::info;

use crate::steps::{StepDescriptor, StepLayout};

/// Projection of the tour state handed to renderers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TourView {
    /// A tour is running (preparing or showing a step)
    pub is_active: bool,
    /// Waiting for the current step's geometry; nothing should be drawn
    pub is_preparing: bool,
    pub tour_id: Option<String>,
    pub step_count: usize,
    /// The step to draw, only set once its geometry has resolved
    pub current_step: Option<ActiveStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStep {
    pub index: usize,
    pub descriptor: StepDescriptor,
    pub layout: StepLayout,
    pub is_first: bool,
    pub is_last: bool,
}

impl ActiveStep {
    /// Anchor frame shifted by the platform's top inset (status bar, notch)
    pub fn overlay_frame(&self, top_inset: f32) -> StepLayout {
        self.layout.offset_y(top_inset)
    }
}

/// Receives every change of the tour projection.
///
/// Called from the engine task; implementations must not block.
pub trait RenderBridge: Send + Sync {
    /// Bridge name (for logging)
    fn name(&self) -> &str;

    fn render(&self, view: &TourView);
}

/// Bridge that only logs what would be drawn.
#[derive(Debug, Default)]
pub struct LogRenderBridge {
    top_inset: f32,
}

impl LogRenderBridge {
    pub fn new(top_inset: f32) -> Self {
        Self { top_inset }
    }
}

impl RenderBridge for LogRenderBridge {
    fn name(&self) -> &str {
        "log"
    }

    fn render(&self, view: &TourView) {
        match &view.current_step {
            Some(step) => {
                let frame = step.overlay_frame(self.top_inset);
                info!(
                    tour_id = view.tour_id.as_deref().unwrap_or_default(),
                    step_id = %step.descriptor.step_id,
                    step = %format!("{}/{}", step.index + 1, view.step_count),
                    text = %step.descriptor.text,
                    x = frame.x,
                    y = frame.y,
                    width = frame.width,
                    height = frame.height,
                    "coachmark shown"
                );
            }
            None if view.is_preparing => info!("coachmark hidden while preparing"),
            None => info!("no coachmark"),
        }
    }
}
