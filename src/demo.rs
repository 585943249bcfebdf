//! Scripted walkthrough of the "home" tour against simulated anchors.
//!
//! Step `a` mounts immediately but needs one layout pass, `b` never mounts
//! and `c` mounts after a delay, so the run exercises waiting, skipping and
//! completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::completion::CompletionStore;
use crate::measure::{MeasurementCoordinator, MeasurementPolicy};
use crate::render::LogRenderBridge;
use crate::steps::{Side, StepDescriptor, StepLayout, StepRegistry};
use crate::tour::{TourEngine, TransitionOutcome};

pub const DEMO_TOUR: &str = "home";

pub fn demo_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::new(DEMO_TOUR, "a", 1, "This is your feed").with_title("Welcome"),
        StepDescriptor::new(DEMO_TOUR, "b", 2, "Filter by category"),
        StepDescriptor::new(DEMO_TOUR, "c", 3, "Create a new post here").with_side(Side::Top),
    ]
}

/// Run the demo tour; returns the outcome of every transition in order.
pub async fn run(
    store: Arc<dyn CompletionStore>,
    policy: MeasurementPolicy,
    top_inset: f32,
) -> Result<Vec<TransitionOutcome>> {
    let registry = StepRegistry::new();
    let steps = demo_steps();

    // First measurement lands before the layout pass
    let passes = Arc::new(AtomicUsize::new(0));
    let _anchor_a = registry.mount(steps[0].clone(), move || {
        if passes.fetch_add(1, Ordering::SeqCst) == 0 {
            Some(StepLayout::default())
        } else {
            Some(StepLayout::new(16.0, 120.0, 343.0, 180.0))
        }
    });

    let late = registry.clone();
    let descriptor_c = steps[2].clone();
    let delay = policy.timeout / 4;
    let mount_c = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        late.mount(descriptor_c, || Some(StepLayout::new(300.0, 720.0, 56.0, 56.0)))
    });

    let handle = TourEngine::new(MeasurementCoordinator::new(registry, policy), store)
        .with_render_bridge(Arc::new(LogRenderBridge::new(top_inset)))
        .spawn();

    let completed = handle.hydrate().await?;
    info!(completed, "completion state loaded");

    let mut outcomes = vec![handle.start(DEMO_TOUR, steps).await?];
    // Keep the late anchor mounted for the rest of the run
    let _anchor_c = mount_c.await.context("anchor task failed")?;

    while matches!(outcomes.last(), Some(TransitionOutcome::Active { .. })) {
        outcomes.push(handle.next().await?);
    }

    Ok(outcomes)
}
