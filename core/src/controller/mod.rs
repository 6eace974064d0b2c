//! Cluster-state controllers run before each batch
//!
//! - [`ModeController`] recreates the exposure object in the step's topology
//! - [`CapacityController`] sets the autoscaler bounds and drives the worker
//!   pool to the target size

mod capacity;
mod mode;

pub use capacity::{CapacityController, CapacityOutcome, ScalerPatch, WorkerPoolState};
pub use mode::{ExposurePort, ExposureSpec, ExposureTopology, ModeController};
