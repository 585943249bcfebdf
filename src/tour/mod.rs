//! Tour orchestration: the state machine and the task that drives it

pub mod engine;
pub mod handle;
pub mod machine;

pub use engine::{TourEngine, TransitionOutcome};
pub use handle::{Ticket, TourHandle};
pub use machine::{Direction, Phase, Plan, TourMachine, TourStep, Transition};
