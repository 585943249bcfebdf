//! Coachmark - guided-tour engine
//!
//! Sequences onboarding coachmarks over UI anchors that mount, lay out and
//! unmount on their own schedule, and remembers which tours a user finished.

pub mod completion;
pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod measure;
pub mod render;
pub mod steps;
pub mod tour;

pub use completion::{CompletionStore, JsonFileCompletionStore, MemoryCompletionStore};
pub use error::TourError;
pub use measure::{Measured, MeasurementCoordinator, MeasurementPolicy};
pub use render::{ActiveStep, LogRenderBridge, RenderBridge, TourView};
pub use steps::{Side, StepDescriptor, StepHandle, StepLayout, StepRegistry};
pub use tour::{Phase, TourEngine, TourHandle, TransitionOutcome};
