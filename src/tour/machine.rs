//! Tour state machine.
//!
//! Pure, synchronous transition logic. The engine owns one instance, feeds
//! it requests and measurement outcomes, and carries out the returned
//! [`Plan`]. Lifecycle: `Idle -> Preparing -> Active -> ... -> Idle`.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

use crate::error::TourError;
use crate::measure::Measured;
use crate::render::{ActiveStep, TourView};
use crate::steps::{StepDescriptor, StepLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Waiting for the current step's geometry before revealing it
    Preparing,
    Active,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Preparing => "preparing",
            Phase::Active => "active",
        };
        f.write_str(name)
    }
}

/// Requests the machine understands (used in diagnostics)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Next,
    Prev,
    Stop,
    UpdateLayout,
    Hydrate,
    MarkCompleted,
    Reset,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Start => "start",
            Transition::Next => "next",
            Transition::Prev => "prev",
            Transition::Stop => "stop",
            Transition::UpdateLayout => "update_layout",
            Transition::Hydrate => "hydrate",
            Transition::MarkCompleted => "mark_completed",
            Transition::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Which way the tour is moving while a step is being prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Preparing the first step of a freshly started tour
    Start,
    Forward,
    Backward,
}

/// A step of the running tour with its last resolved geometry
#[derive(Debug, Clone, PartialEq)]
pub struct TourStep {
    pub descriptor: StepDescriptor,
    pub layout: Option<StepLayout>,
}

/// Follow-up work for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Resolve geometry for the step at `index`
    Measure {
        tour_id: String,
        index: usize,
        step_id: String,
    },
    /// Tour finished; flush its completion flag
    Complete { tour_id: String },
    /// Tour could not be shown and is back to idle
    Abort,
    /// No earlier step resolved; the previously shown step is active again
    Restore { index: usize },
}

#[derive(Debug, Default)]
pub struct TourMachine {
    phase: Phase,
    tour_id: Option<String>,
    index: usize,
    steps: Vec<TourStep>,
    /// Last step index revealed in the running tour
    revealed: Option<usize>,
    completed: HashMap<String, bool>,
    hydrated: bool,
}

impl TourMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tour_id(&self) -> Option<&str> {
        self.tour_id.as_deref()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn steps(&self) -> &[TourStep] {
        &self.steps
    }

    pub fn is_completed(&self, tour_id: &str) -> bool {
        self.completed.get(tour_id).copied().unwrap_or(false)
    }

    pub fn is_running(&self, tour_id: &str) -> bool {
        self.phase != Phase::Idle && self.tour_id.as_deref() == Some(tour_id)
    }

    /// Load the persisted completion mapping. Allowed once.
    pub fn hydrate(&mut self, completed: HashMap<String, bool>) -> Result<usize, TourError> {
        if self.hydrated {
            return Err(TourError::AlreadyHydrated);
        }
        self.completed = completed;
        self.hydrated = true;

        let done = self.completed.values().filter(|c| **c).count();
        debug!(tours = self.completed.len(), completed = done, "completion state hydrated");
        Ok(done)
    }

    /// Begin a tour, preempting any other running tour.
    ///
    /// Returns `None` when the tour was completed earlier; nothing changes then.
    pub fn start(
        &mut self,
        tour_id: &str,
        mut steps: Vec<StepDescriptor>,
    ) -> Result<Option<Plan>, TourError> {
        if !self.hydrated {
            return Err(TourError::NotHydrated);
        }
        if self.is_running(tour_id) {
            return Err(TourError::invalid(
                Transition::Start,
                self.phase,
                "this tour is already running",
            ));
        }
        if self.is_completed(tour_id) {
            debug!(tour_id, "tour already completed, not starting");
            return Ok(None);
        }

        validate(tour_id, &mut steps)?;

        if let Some(previous) = self.tour_id.as_deref() {
            info!(tour_id, preempted = previous, "preempting running tour");
        }

        self.reset();
        self.tour_id = Some(tour_id.to_string());
        self.steps = steps
            .into_iter()
            .map(|descriptor| TourStep {
                descriptor,
                layout: None,
            })
            .collect();
        info!(tour_id, steps = self.steps.len(), "tour started");

        Ok(Some(self.prepare(0)))
    }

    /// Move to the neighbouring step.
    pub fn advance(&mut self, direction: Direction) -> Result<Plan, TourError> {
        let transition = match direction {
            Direction::Backward => Transition::Prev,
            _ => Transition::Next,
        };

        match self.phase {
            Phase::Idle => {
                return Err(TourError::invalid(
                    transition,
                    self.phase,
                    "no tour is running",
                ))
            }
            Phase::Preparing if self.revealed.is_none() => {
                return Err(TourError::invalid(
                    transition,
                    self.phase,
                    "the first step has not been shown yet",
                ))
            }
            _ => {}
        }

        match direction {
            Direction::Backward => {
                if self.index == 0 {
                    return Err(TourError::invalid(
                        transition,
                        self.phase,
                        "already at the first step",
                    ));
                }
                Ok(self.prepare(self.index - 1))
            }
            _ => {
                if self.index + 1 >= self.steps.len() {
                    Ok(self.complete())
                } else {
                    Ok(self.prepare(self.index + 1))
                }
            }
        }
    }

    /// The step being prepared resolved; reveal it.
    pub fn reveal(&mut self, measured: Measured) {
        let Some(step) = self.steps.get_mut(self.index) else {
            return;
        };
        step.descriptor.refresh_from(&measured.descriptor);
        step.layout = Some(measured.layout);
        self.phase = Phase::Active;
        self.revealed = Some(self.index);

        info!(
            tour_id = self.tour_id.as_deref().unwrap_or_default(),
            step_id = %step.descriptor.step_id,
            index = self.index,
            "step revealed"
        );
    }

    /// The step being prepared never resolved; decide where to go instead.
    pub fn skip(&mut self, direction: Direction) -> Plan {
        let tour_id = self.tour_id.clone().unwrap_or_default();
        let step_id = self
            .steps
            .get(self.index)
            .map(|s| s.descriptor.step_id.clone())
            .unwrap_or_default();

        match direction {
            Direction::Start => {
                info!(tour_id = %tour_id, step_id = %step_id, "first step unavailable, aborting tour");
                self.reset();
                Plan::Abort
            }
            Direction::Forward => {
                info!(tour_id = %tour_id, step_id = %step_id, "step unavailable, skipping forward");
                if self.index + 1 < self.steps.len() {
                    self.prepare(self.index + 1)
                } else {
                    self.complete()
                }
            }
            Direction::Backward => {
                info!(tour_id = %tour_id, step_id = %step_id, "step unavailable, skipping backward");
                if self.index > 0 {
                    self.prepare(self.index - 1)
                } else if let Some(index) = self.revealed {
                    self.index = index;
                    self.phase = Phase::Active;
                    Plan::Restore { index }
                } else {
                    self.reset();
                    Plan::Abort
                }
            }
        }
    }

    /// Dismiss the running tour without completing it.
    pub fn stop(&mut self) -> Result<String, TourError> {
        let Some(tour_id) = self.tour_id.clone().filter(|_| self.phase != Phase::Idle) else {
            return Err(TourError::invalid(
                Transition::Stop,
                self.phase,
                "no tour is running",
            ));
        };
        info!(tour_id = %tour_id, index = self.index, "tour stopped");
        self.reset();
        Ok(tour_id)
    }

    /// Replace the active step's geometry. Ignored for any other step.
    pub fn update_layout(&mut self, step_id: &str, layout: StepLayout) -> bool {
        if self.phase != Phase::Active || !layout.is_resolved() {
            return false;
        }
        match self.steps.get_mut(self.index) {
            Some(step) if step.descriptor.step_id == step_id => {
                step.layout = Some(layout);
                true
            }
            _ => false,
        }
    }

    /// Record a tour as completed. Returns true if it was not completed before.
    pub fn mark_completed(&mut self, tour_id: &str) -> Result<bool, TourError> {
        if !self.hydrated {
            return Err(TourError::NotHydrated);
        }
        Ok(self.completed.insert(tour_id.to_string(), true) != Some(true))
    }

    /// Forget a tour's completion so it can be shown again.
    pub fn reset_completion(&mut self, tour_id: &str) -> Result<bool, TourError> {
        if !self.hydrated {
            return Err(TourError::NotHydrated);
        }
        Ok(self.completed.insert(tour_id.to_string(), false) == Some(true))
    }

    pub fn view(&self) -> TourView {
        let current_step = match self.phase {
            Phase::Active => self.steps.get(self.index).and_then(|step| {
                step.layout.map(|layout| ActiveStep {
                    index: self.index,
                    descriptor: step.descriptor.clone(),
                    layout,
                    is_first: self.index == 0,
                    is_last: self.index + 1 == self.steps.len(),
                })
            }),
            _ => None,
        };

        TourView {
            is_active: self.phase != Phase::Idle,
            is_preparing: self.phase == Phase::Preparing,
            tour_id: self.tour_id.clone(),
            step_count: self.steps.len(),
            current_step,
        }
    }

    fn prepare(&mut self, index: usize) -> Plan {
        self.index = index;
        self.phase = Phase::Preparing;
        Plan::Measure {
            tour_id: self.tour_id.clone().unwrap_or_default(),
            index,
            step_id: self.steps[index].descriptor.step_id.clone(),
        }
    }

    fn complete(&mut self) -> Plan {
        let tour_id = self.tour_id.clone().unwrap_or_default();
        self.completed.insert(tour_id.clone(), true);
        info!(tour_id = %tour_id, "tour completed");
        self.reset();
        Plan::Complete { tour_id }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.tour_id = None;
        self.index = 0;
        self.steps.clear();
        self.revealed = None;
    }
}

/// Sort by order and reject tours the machine cannot traverse.
fn validate(tour_id: &str, steps: &mut [StepDescriptor]) -> Result<(), TourError> {
    if steps.is_empty() {
        return Err(TourError::EmptyTour(tour_id.to_string()));
    }
    if let Some(foreign) = steps.iter().find(|s| s.tour_id != tour_id) {
        return Err(TourError::ForeignStep {
            tour_id: tour_id.to_string(),
            step_id: foreign.step_id.clone(),
            step_tour: foreign.tour_id.clone(),
        });
    }

    steps.sort_by_key(|s| s.order);
    if let Some(pair) = steps.windows(2).find(|w| w[0].order == w[1].order) {
        return Err(TourError::DuplicateOrder {
            tour_id: tour_id.to_string(),
            order: pair[0].order,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, order: i32) -> StepDescriptor {
        StepDescriptor::new("home", id, order, id.to_uppercase())
    }

    fn home_steps() -> Vec<StepDescriptor> {
        vec![step("c", 3), step("a", 1), step("b", 2)]
    }

    fn measured(id: &str, order: i32) -> Measured {
        Measured {
            descriptor: step(id, order),
            layout: StepLayout::new(10.0, 20.0, 30.0, 40.0),
        }
    }

    fn hydrated() -> TourMachine {
        let mut machine = TourMachine::new();
        machine.hydrate(HashMap::new()).unwrap();
        machine
    }

    fn started() -> TourMachine {
        let mut machine = hydrated();
        machine.start("home", home_steps()).unwrap();
        machine.reveal(measured("a", 1));
        machine
    }

    #[test]
    fn test_start_requires_hydration() {
        let mut machine = TourMachine::new();
        assert_eq!(
            machine.start("home", home_steps()),
            Err(TourError::NotHydrated)
        );
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_hydrate_only_once() {
        let mut machine = hydrated();
        assert_eq!(
            machine.hydrate(HashMap::new()),
            Err(TourError::AlreadyHydrated)
        );
    }

    #[test]
    fn test_start_sorts_steps_and_prepares_first() {
        let mut machine = hydrated();
        let plan = machine.start("home", home_steps()).unwrap();

        assert_eq!(
            plan,
            Some(Plan::Measure {
                tour_id: "home".into(),
                index: 0,
                step_id: "a".into(),
            })
        );
        assert_eq!(machine.phase(), Phase::Preparing);
        let order: Vec<i32> = machine.steps().iter().map(|s| s.descriptor.order).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let view = machine.view();
        assert!(view.is_active);
        assert!(view.is_preparing);
        assert!(view.current_step.is_none());
    }

    #[test]
    fn test_start_completed_tour_stays_idle() {
        let mut machine = TourMachine::new();
        machine
            .hydrate(HashMap::from([("home".to_string(), true)]))
            .unwrap();

        assert_eq!(
            machine.start("home", home_steps()),
            Ok(None)
        );
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_start_rejects_bad_step_lists() {
        let mut machine = hydrated();
        assert_eq!(
            machine.start("home", vec![]),
            Err(TourError::EmptyTour("home".into()))
        );
        assert_eq!(
            machine.start("home", vec![step("a", 1), step("b", 1)]),
            Err(TourError::DuplicateOrder {
                tour_id: "home".into(),
                order: 1,
            })
        );
        assert!(matches!(
            machine.start("home", vec![StepDescriptor::new("profile", "x", 1, "X")]),
            Err(TourError::ForeignStep { .. })
        ));
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_restarting_same_tour_is_rejected() {
        let mut machine = started();
        let err = machine.start("home", home_steps()).unwrap_err();
        assert!(matches!(
            err,
            TourError::InvalidTransition {
                transition: Transition::Start,
                ..
            }
        ));
        assert_eq!(machine.phase(), Phase::Active);
    }

    #[test]
    fn test_other_tour_preempts() {
        let mut machine = started();
        let plan = machine
            .start("profile", vec![StepDescriptor::new("profile", "x", 1, "X")])
            .unwrap();

        assert!(matches!(plan, Some(Plan::Measure { index: 0, .. })));
        assert_eq!(machine.tour_id(), Some("profile"));
        assert!(!machine.is_completed("home"));
    }

    #[test]
    fn test_reveal_caches_layout_and_refreshes_text() {
        let mut machine = hydrated();
        machine.start("home", home_steps()).unwrap();

        let mut newer = measured("a", 1);
        newer.descriptor.text = "Remounted".into();
        machine.reveal(newer);

        let view = machine.view();
        let current = view.current_step.unwrap();
        assert_eq!(current.descriptor.text, "Remounted");
        assert_eq!(current.layout, StepLayout::new(10.0, 20.0, 30.0, 40.0));
        assert!(current.is_first);
        assert!(!current.is_last);
        assert!(!view.is_preparing);
    }

    #[test]
    fn test_next_through_to_completion() {
        let mut machine = started();

        assert!(matches!(
            machine.advance(Direction::Forward),
            Ok(Plan::Measure { index: 1, .. })
        ));
        machine.reveal(measured("b", 2));
        assert!(matches!(
            machine.advance(Direction::Forward),
            Ok(Plan::Measure { index: 2, .. })
        ));
        machine.reveal(measured("c", 3));
        assert!(machine.view().current_step.unwrap().is_last);

        assert_eq!(
            machine.advance(Direction::Forward),
            Ok(Plan::Complete {
                tour_id: "home".into()
            })
        );
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.is_completed("home"));
    }

    #[test]
    fn test_next_while_idle_is_invalid() {
        let mut machine = hydrated();
        let err = machine.advance(Direction::Forward).unwrap_err();
        assert!(err.is_no_op());
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_next_before_first_reveal_is_invalid() {
        let mut machine = hydrated();
        machine.start("home", home_steps()).unwrap();
        assert!(machine.advance(Direction::Forward).is_err());
        assert_eq!(machine.index(), 0);
    }

    #[test]
    fn test_prev_at_first_step_is_no_op() {
        let mut machine = started();
        let before = machine.view();

        let err = machine.advance(Direction::Backward).unwrap_err();
        assert!(matches!(
            err,
            TourError::InvalidTransition {
                transition: Transition::Prev,
                ..
            }
        ));
        assert_eq!(machine.view(), before);
    }

    #[test]
    fn test_first_step_unavailable_aborts() {
        let mut machine = hydrated();
        machine.start("home", home_steps()).unwrap();

        assert_eq!(machine.skip(Direction::Start), Plan::Abort);
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(!machine.is_completed("home"));
    }

    #[test]
    fn test_forward_skip_and_exhaustion() {
        let mut machine = started();
        machine.advance(Direction::Forward).unwrap();

        assert!(matches!(
            machine.skip(Direction::Forward),
            Plan::Measure { index: 2, .. }
        ));
        assert_eq!(
            machine.skip(Direction::Forward),
            Plan::Complete {
                tour_id: "home".into()
            }
        );
        assert!(machine.is_completed("home"));
    }

    #[test]
    fn test_backward_skip_restores_shown_step() {
        let mut machine = started();
        machine.advance(Direction::Forward).unwrap();
        machine.reveal(measured("b", 2));

        assert!(matches!(
            machine.advance(Direction::Backward),
            Ok(Plan::Measure { index: 0, .. })
        ));
        assert_eq!(machine.skip(Direction::Backward), Plan::Restore { index: 1 });
        assert_eq!(machine.phase(), Phase::Active);
        assert_eq!(machine.view().current_step.unwrap().descriptor.step_id, "b");
    }

    #[test]
    fn test_stop_does_not_complete() {
        let mut machine = started();
        assert_eq!(machine.stop(), Ok("home".to_string()));
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(!machine.is_completed("home"));
        assert!(machine.stop().is_err());
    }

    #[test]
    fn test_update_layout_only_for_active_step() {
        let mut machine = started();
        let moved = StepLayout::new(1.0, 2.0, 3.0, 4.0);

        assert!(!machine.update_layout("b", moved));
        assert_eq!(
            machine.view().current_step.unwrap().layout,
            StepLayout::new(10.0, 20.0, 30.0, 40.0)
        );

        assert!(!machine.update_layout("a", StepLayout::default()));
        assert!(machine.update_layout("a", moved));
        assert_eq!(machine.view().current_step.unwrap().layout, moved);
        assert_eq!(machine.index(), 0);
        assert_eq!(machine.phase(), Phase::Active);
    }

    #[test]
    fn test_update_layout_ignored_while_preparing() {
        let mut machine = hydrated();
        machine.start("home", home_steps()).unwrap();
        assert!(!machine.update_layout("a", StepLayout::new(1.0, 1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_mark_and_reset_completion() {
        let mut machine = hydrated();
        assert_eq!(machine.mark_completed("home"), Ok(true));
        assert_eq!(machine.mark_completed("home"), Ok(false));
        assert!(machine.is_completed("home"));

        assert_eq!(machine.reset_completion("home"), Ok(true));
        assert!(!machine.is_completed("home"));
        assert_eq!(machine.reset_completion("home"), Ok(false));
    }
}
