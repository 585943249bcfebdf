//! Step descriptors and the registry UI elements mount them into

pub mod registry;
pub mod types;

pub use registry::{Measure, RegisteredStep, RegistrationToken, StepHandle, StepRegistry};
pub use types::{Side, StepDescriptor, StepKey, StepLayout};
