//! Public handle to the tour engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use super::engine::{Command, Reply, TransitionOutcome};
use crate::completion::CompletionStore;
use crate::error::TourError;
use crate::render::TourView;
use crate::steps::{StepDescriptor, StepLayout, StepRegistry};

/// Outcome of a request that has already been queued.
///
/// The request is enqueued when the handle method is called, whether or not
/// the ticket is awaited.
#[must_use = "the request is already queued; await the ticket to learn how it settled"]
pub struct Ticket<T> {
    rx: Option<oneshot::Receiver<Result<T, TourError>>>,
}

impl<T> Unpin for Ticket<T> {}

impl<T> Future for Ticket<T> {
    type Output = Result<T, TourError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut().rx.as_mut() {
            None => Poll::Ready(Err(TourError::EngineClosed)),
            Some(rx) => Pin::new(rx)
                .poll(cx)
                .map(|settled| settled.unwrap_or(Err(TourError::EngineClosed))),
        }
    }
}

/// Cheap, clonable front end of a running [`TourEngine`](super::TourEngine).
#[derive(Clone)]
pub struct TourHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<TourView>,
    store: Arc<dyn CompletionStore>,
    registry: StepRegistry,
}

impl TourHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        view: watch::Receiver<TourView>,
        store: Arc<dyn CompletionStore>,
        registry: StepRegistry,
    ) -> Self {
        Self {
            commands,
            view,
            store,
            registry,
        }
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Ticket<T> {
        let (tx, rx) = oneshot::channel();
        match self.commands.send(command(tx)) {
            Ok(()) => Ticket { rx: Some(rx) },
            Err(_) => Ticket { rx: None },
        }
    }

    /// Load completion flags from the store into the engine.
    ///
    /// An unreadable store is logged and treated as empty so tours still run.
    /// Returns the number of completed tours.
    pub async fn hydrate(&self) -> Result<usize, TourError> {
        let completed = match self.store.hydrate().await {
            Ok(completed) => completed,
            Err(e) => {
                warn!(store = self.store.name(), error = %format!("{e:#}"), "failed to read completion store, starting empty");
                HashMap::new()
            }
        };
        self.hydrate_with(completed).await
    }

    /// Load an explicit completion mapping.
    pub fn hydrate_with(&self, completed: HashMap<String, bool>) -> Ticket<usize> {
        self.request(|reply| Command::Hydrate { completed, reply })
    }

    /// Start a tour with the given steps; settles once the first step is on
    /// screen or the tour gives up.
    pub fn start(
        &self,
        tour_id: impl Into<String>,
        steps: Vec<StepDescriptor>,
    ) -> Ticket<TransitionOutcome> {
        let tour_id = tour_id.into();
        self.request(|reply| Command::Start {
            tour_id,
            steps,
            reply,
        })
    }

    /// Start a tour from the steps currently registered for it.
    pub fn start_registered(&self, tour_id: impl Into<String>) -> Ticket<TransitionOutcome> {
        let tour_id = tour_id.into();
        let steps = self.registry.descriptors(&tour_id);
        self.start(tour_id, steps)
    }

    pub fn next(&self) -> Ticket<TransitionOutcome> {
        self.request(|reply| Command::Next { reply })
    }

    pub fn prev(&self) -> Ticket<TransitionOutcome> {
        self.request(|reply| Command::Prev { reply })
    }

    /// Dismiss the running tour without completing it.
    pub fn stop(&self) -> Ticket<TransitionOutcome> {
        self.request(|reply| Command::Stop { reply })
    }

    /// Report new geometry for a step; applied only if it is the active step.
    pub fn update_layout(&self, step_id: impl Into<String>, layout: StepLayout) -> Ticket<bool> {
        let step_id = step_id.into();
        self.request(|reply| Command::UpdateLayout {
            step_id,
            layout,
            reply,
        })
    }

    /// Never show this tour again. Returns true if it was not completed before.
    pub fn mark_completed(&self, tour_id: impl Into<String>) -> Ticket<bool> {
        let tour_id = tour_id.into();
        self.request(|reply| Command::MarkCompleted { tour_id, reply })
    }

    /// Make a completed tour eligible again. Returns true if it was completed.
    pub fn reset(&self, tour_id: impl Into<String>) -> Ticket<bool> {
        let tour_id = tour_id.into();
        self.request(|reply| Command::Reset { tour_id, reply })
    }

    pub fn is_completed(&self, tour_id: impl Into<String>) -> Ticket<bool> {
        let tour_id = tour_id.into();
        self.request(|reply| Command::IsCompleted { tour_id, reply })
    }

    /// Latest published projection
    pub fn view(&self) -> TourView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every projection change
    pub fn subscribe(&self) -> watch::Receiver<TourView> {
        self.view.clone()
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }
}
