//! Batch processing: worker pool, coordinator and batch registry

mod coordinator;
mod registry;
mod runner;

pub use coordinator::BatchCoordinator;
pub use registry::{BatchRegistry, RegistryStats};
pub use runner::{ParallelRunner, TaskError, TaskOutcome};
