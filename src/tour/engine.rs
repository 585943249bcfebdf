//! Tour orchestrator task.
//!
//! A single tokio task owns the [`TourMachine`] and drains a queue of
//! requests, so no two transitions ever interleave. Step measurements run on
//! their own tasks and report back through a second channel tagged with a
//! generation number; a measurement whose generation is no longer the
//! pending one is discarded.
//!
//! Replies are held back until the projection for the same event has been
//! published, so a caller that wakes on a reply always reads the new view.
//! Completion writes go through one writer task and reach the store in the
//! order the machine made them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handle::TourHandle;
use super::machine::{Direction, Phase, Plan, TourMachine, Transition};
use crate::completion::CompletionStore;
use crate::error::TourError;
use crate::measure::{Measured, MeasurementCoordinator};
use crate::render::{RenderBridge, TourView};
use crate::steps::{StepDescriptor, StepLayout};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, TourError>>;

/// A settled reply waiting for the projection to be published
type Deferred = Box<dyn FnOnce() + Send>;

/// `(tour_id, completed)` queued for the completion store
type CompletionWrite = (String, bool);

/// How a start/next/prev request settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The step is on screen with resolved geometry
    Active {
        tour_id: String,
        index: usize,
        step_id: String,
    },
    /// Last step passed; completion recorded
    Completed { tour_id: String },
    Stopped { tour_id: String },
    /// Tour was completed earlier and was not started
    AlreadyCompleted { tour_id: String },
}

pub(crate) enum Command {
    Hydrate {
        completed: HashMap<String, bool>,
        reply: Reply<usize>,
    },
    Start {
        tour_id: String,
        steps: Vec<StepDescriptor>,
        reply: Reply<TransitionOutcome>,
    },
    Next {
        reply: Reply<TransitionOutcome>,
    },
    Prev {
        reply: Reply<TransitionOutcome>,
    },
    Stop {
        reply: Reply<TransitionOutcome>,
    },
    UpdateLayout {
        step_id: String,
        layout: StepLayout,
        reply: Reply<bool>,
    },
    MarkCompleted {
        tour_id: String,
        reply: Reply<bool>,
    },
    Reset {
        tour_id: String,
        reply: Reply<bool>,
    },
    IsCompleted {
        tour_id: String,
        reply: Reply<bool>,
    },
}

/// Builder for the orchestrator task
pub struct TourEngine {
    coordinator: MeasurementCoordinator,
    store: Arc<dyn CompletionStore>,
    bridges: Vec<Arc<dyn RenderBridge>>,
}

impl TourEngine {
    pub fn new(coordinator: MeasurementCoordinator, store: Arc<dyn CompletionStore>) -> Self {
        Self {
            coordinator,
            store,
            bridges: Vec::new(),
        }
    }

    /// Add a bridge that is called on every change of the tour projection
    pub fn with_render_bridge(mut self, bridge: Arc<dyn RenderBridge>) -> Self {
        self.bridges.push(bridge);
        self
    }

    /// Start the orchestrator on the current tokio runtime.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(self) -> TourHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (measured_tx, measured_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(TourView::default());

        let handle = TourHandle::new(
            commands_tx,
            view_rx,
            self.store.clone(),
            self.coordinator.registry().clone(),
        );

        let task = EngineTask {
            machine: TourMachine::new(),
            coordinator: self.coordinator,
            bridges: self.bridges,
            commands: commands_rx,
            measured_tx,
            measured_rx,
            writes: writes_tx,
            view_tx,
            generation: 0,
            pending: None,
            outbox: Vec::new(),
        };
        tokio::spawn(write_completions(self.store, writes_rx));
        tokio::spawn(task.run());

        handle
    }
}

/// In-flight measurement for the step the machine is preparing
struct PendingMeasure {
    generation: u64,
    direction: Direction,
    reply: Reply<TransitionOutcome>,
    task: JoinHandle<()>,
}

type MeasureResult = (u64, Result<Measured, TourError>);

struct EngineTask {
    machine: TourMachine,
    coordinator: MeasurementCoordinator,
    bridges: Vec<Arc<dyn RenderBridge>>,
    commands: mpsc::UnboundedReceiver<Command>,
    measured_tx: mpsc::UnboundedSender<MeasureResult>,
    measured_rx: mpsc::UnboundedReceiver<MeasureResult>,
    writes: mpsc::UnboundedSender<CompletionWrite>,
    view_tx: watch::Sender<TourView>,
    generation: u64,
    pending: Option<PendingMeasure>,
    outbox: Vec<Deferred>,
}

impl EngineTask {
    async fn run(mut self) {
        debug!("tour engine started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some((generation, result)) = self.measured_rx.recv() => {
                    self.on_measured(generation, result);
                }
            }
            self.publish();
            self.flush_replies();
        }

        self.supersede();
        self.flush_replies();
        debug!("tour engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Hydrate { completed, reply } => {
                let result = self.machine.hydrate(completed);
                if let Err(ref err) = result {
                    warn!(transition = %Transition::Hydrate, error = %err, "transition rejected");
                }
                self.respond(reply, result);
            }
            Command::Start {
                tour_id,
                steps,
                reply,
            } => self.on_start(tour_id, steps, reply),
            Command::Next { reply } => self.on_advance(Direction::Forward, reply),
            Command::Prev { reply } => self.on_advance(Direction::Backward, reply),
            Command::Stop { reply } => match self.machine.stop() {
                Ok(tour_id) => {
                    self.supersede();
                    self.respond(reply, Ok(TransitionOutcome::Stopped { tour_id }));
                }
                Err(err) => self.reject(Transition::Stop, err, reply),
            },
            Command::UpdateLayout {
                step_id,
                layout,
                reply,
            } => {
                let applied = self.machine.update_layout(&step_id, layout);
                if !applied {
                    debug!(step_id = %step_id, phase = %self.machine.phase(), "layout update ignored");
                }
                self.respond(reply, Ok(applied));
            }
            Command::MarkCompleted { tour_id, reply } => self.on_mark_completed(tour_id, reply),
            Command::Reset { tour_id, reply } => match self.machine.reset_completion(&tour_id) {
                Ok(was_completed) => {
                    if was_completed {
                        self.persist(tour_id, false);
                    }
                    self.respond(reply, Ok(was_completed));
                }
                Err(err) => self.reject(Transition::Reset, err, reply),
            },
            Command::IsCompleted { tour_id, reply } => {
                let completed = self.machine.is_completed(&tour_id);
                self.respond(reply, Ok(completed));
            }
        }
    }

    fn on_start(
        &mut self,
        tour_id: String,
        steps: Vec<StepDescriptor>,
        reply: Reply<TransitionOutcome>,
    ) {
        match self.machine.start(&tour_id, steps) {
            Ok(None) => {
                self.respond(reply, Ok(TransitionOutcome::AlreadyCompleted { tour_id }));
            }
            Ok(Some(plan)) => {
                self.supersede();
                self.settle(plan, Direction::Start, reply, None);
            }
            Err(err) => self.reject(Transition::Start, err, reply),
        }
    }

    fn on_advance(&mut self, direction: Direction, reply: Reply<TransitionOutcome>) {
        let transition = match direction {
            Direction::Backward => Transition::Prev,
            _ => Transition::Next,
        };
        match self.machine.advance(direction) {
            Ok(plan) => {
                self.supersede();
                self.settle(plan, direction, reply, None);
            }
            Err(err) => self.reject(transition, err, reply),
        }
    }

    fn on_mark_completed(&mut self, tour_id: String, reply: Reply<bool>) {
        match self.machine.mark_completed(&tour_id) {
            Ok(newly) => {
                // Skipping a tour forever also dismisses it
                if self.machine.is_running(&tour_id) {
                    self.supersede();
                    let _ = self.machine.stop();
                }
                if newly {
                    self.persist(tour_id, true);
                }
                self.respond(reply, Ok(newly));
            }
            Err(err) => self.reject(Transition::MarkCompleted, err, reply),
        }
    }

    fn on_measured(&mut self, generation: u64, result: Result<Measured, TourError>) {
        let pending = match self.pending.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                debug!(generation, "discarding stale measurement");
                self.pending = other;
                return;
            }
        };

        match result {
            Ok(measured) => {
                self.machine.reveal(measured);
                let outcome = self.active_outcome();
                self.respond(pending.reply, outcome);
            }
            Err(err) => {
                warn!(error = %err, "step target unavailable");
                let plan = self.machine.skip(pending.direction);
                self.settle(plan, pending.direction, pending.reply, Some(err));
            }
        }
    }

    /// Carry out a plan; `failure` is the error that led to it, if any.
    fn settle(
        &mut self,
        plan: Plan,
        direction: Direction,
        reply: Reply<TransitionOutcome>,
        failure: Option<TourError>,
    ) {
        let outcome = match plan {
            Plan::Measure {
                tour_id, step_id, ..
            } => {
                self.measure(tour_id, step_id, direction, reply);
                return;
            }
            Plan::Complete { tour_id } => {
                self.persist(tour_id.clone(), true);
                Ok(TransitionOutcome::Completed { tour_id })
            }
            Plan::Restore { .. } => Err(TourError::invalid(
                Transition::Prev,
                Phase::Active,
                "no earlier step could be shown",
            )),
            Plan::Abort => Err(failure.unwrap_or(TourError::Superseded)),
        };
        self.respond(reply, outcome);
    }

    fn measure(
        &mut self,
        tour_id: String,
        step_id: String,
        direction: Direction,
        reply: Reply<TransitionOutcome>,
    ) {
        self.generation += 1;
        let generation = self.generation;
        debug!(tour_id = %tour_id, step_id = %step_id, generation, "preparing step");

        let coordinator = self.coordinator.clone();
        let results = self.measured_tx.clone();
        let task = tokio::spawn(async move {
            let result = coordinator.measure(&tour_id, &step_id).await;
            let _ = results.send((generation, result));
        });

        self.pending = Some(PendingMeasure {
            generation,
            direction,
            reply,
            task,
        });
    }

    /// Cancel the in-flight measurement, if any.
    fn supersede(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            debug!(generation = pending.generation, "pending measurement superseded");
            self.respond(pending.reply, Err(TourError::Superseded));
        }
    }

    fn active_outcome(&self) -> Result<TransitionOutcome, TourError> {
        let tour_id = self.machine.tour_id().unwrap_or_default().to_string();
        let index = self.machine.index();
        let step_id = self
            .machine
            .steps()
            .get(index)
            .map(|s| s.descriptor.step_id.clone())
            .unwrap_or_default();
        Ok(TransitionOutcome::Active {
            tour_id,
            index,
            step_id,
        })
    }

    fn reject<T: Send + 'static>(
        &mut self,
        transition: Transition,
        err: TourError,
        reply: Reply<T>,
    ) {
        warn!(transition = %transition, phase = %self.machine.phase(), error = %err, "transition rejected");
        self.respond(reply, Err(err));
    }

    /// Queue a reply; it is sent once the current event has been published.
    fn respond<T: Send + 'static>(&mut self, reply: Reply<T>, result: Result<T, TourError>) {
        self.outbox.push(Box::new(move || {
            let _ = reply.send(result);
        }));
    }

    fn flush_replies(&mut self) {
        for reply in self.outbox.drain(..) {
            reply();
        }
    }

    /// Fire-and-forget write of a completion flag.
    fn persist(&self, tour_id: String, completed: bool) {
        if self.writes.send((tour_id, completed)).is_err() {
            warn!("completion writer stopped, dropping write");
        }
    }

    /// Push the projection to subscribers and bridges when it changed.
    fn publish(&mut self) {
        let view = self.machine.view();
        if *self.view_tx.borrow() == view {
            return;
        }
        for bridge in &self.bridges {
            bridge.render(&view);
        }
        self.view_tx.send_replace(view);
    }
}

/// Apply completion writes one at a time, in the order they were queued.
///
/// Ends once the engine task drops its sender and the queue is drained.
async fn write_completions(
    store: Arc<dyn CompletionStore>,
    mut writes: mpsc::UnboundedReceiver<CompletionWrite>,
) {
    while let Some((tour_id, completed)) = writes.recv().await {
        if let Err(e) = store.set_completed(&tour_id, completed).await {
            let err = TourError::PersistenceWriteFailure {
                tour_id,
                reason: format!("{e:#}"),
            };
            warn!(store = store.name(), error = %err, "completion write failed");
        }
    }
    debug!(store = store.name(), "completion writer stopped");
}
