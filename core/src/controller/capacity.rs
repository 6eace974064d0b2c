//! Worker pool capacity control
//!
//! Writes the autoscaler bounds for the step's mode, optionally drains the
//! pool, then raises it to the target and waits for availability. The pool
//! state is re-read on every probe and never cached across calls.

use crate::context::OrchestrationContext;
use crate::error::{BenchError, BenchResult};
use crate::experiment::ServiceMode;
use crate::poll::poll_until;
use crate::traits::{PoolStatus, ScalerBounds};

/// Result of patching the autoscaler policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalerPatch {
    /// Bounds were written
    Applied,
    /// The policy object could not be patched; scaling continued regardless
    Degraded {
        /// Underlying error
        reason: String,
    },
}

impl ScalerPatch {
    /// Whether the patch failed
    pub fn is_degraded(&self) -> bool {
        matches!(self, ScalerPatch::Degraded { .. })
    }
}

/// Worker pool state after a capacity change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolState {
    /// Replica count written to the pool
    pub desired_replicas: u32,
    /// Autoscaler lower bound requested
    pub autoscaler_min: u32,
    /// Autoscaler upper bound requested
    pub autoscaler_max: u32,
    /// Last observed available replicas
    pub available_replicas: u32,
}

/// Outcome of [`CapacityController::set_capacity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityOutcome {
    /// Observed pool state
    pub state: WorkerPoolState,
    /// Autoscaler patch result
    pub scaler: ScalerPatch,
}

#[derive(Debug, Clone, Copy)]
enum Convergence {
    Drained,
    AtLeast(u32),
}

impl Convergence {
    fn reached(self, status: PoolStatus) -> bool {
        match self {
            Convergence::Drained => status.available == 0,
            Convergence::AtLeast(target) => status.available >= target,
        }
    }

    fn describe(self, deployment: &str) -> String {
        match self {
            Convergence::Drained => format!("deployment {deployment} draining to 0"),
            Convergence::AtLeast(n) => format!("deployment {deployment} reaching {n} available"),
        }
    }
}

/// Drives the worker pool to a target size
pub struct CapacityController<'a> {
    ctx: &'a OrchestrationContext,
}

impl<'a> CapacityController<'a> {
    /// Create a controller
    pub fn new(ctx: &'a OrchestrationContext) -> Self {
        Self { ctx }
    }

    /// Autoscaler bounds for a mode and target
    pub fn bounds_for(&self, mode: ServiceMode, target: u32) -> ScalerBounds {
        let cluster = &self.ctx.config().cluster;
        if mode.is_autoscaled() {
            ScalerBounds {
                min: cluster.autoscale_min,
                max: cluster.autoscale_max,
            }
        } else {
            ScalerBounds::pinned(target)
        }
    }

    /// Set autoscaler bounds, optionally drain, then scale to `target`
    ///
    /// # Errors
    ///
    /// Pool API failures propagate. A convergence wait that exhausts
    /// `timing.capacity_timeout` yields [`BenchError::ConvergenceTimeout`];
    /// a shutdown request yields [`BenchError::Cancelled`]. An autoscaler
    /// patch failure is reported in the outcome, not as an error.
    pub async fn set_capacity(
        &self,
        target: u32,
        mode: ServiceMode,
        force_reset: bool,
    ) -> BenchResult<CapacityOutcome> {
        let config = self.ctx.config();
        let cluster = self.ctx.cluster();
        let deployment = config.cluster.deployment.as_str();
        let scaled_object = config.cluster.scaled_object.name.as_str();

        let bounds = self.bounds_for(mode, target);
        let scaler = match cluster.patch_scaler_bounds(scaled_object, bounds).await {
            Ok(()) => {
                tracing::info!(
                    scaled_object,
                    mode = %mode,
                    bounds = %bounds,
                    "Patched autoscaler bounds"
                );
                ScalerPatch::Applied
            }
            Err(e) => {
                tracing::warn!(
                    scaled_object,
                    error = %e,
                    "Failed to patch autoscaler bounds, continuing with pool scaling"
                );
                ScalerPatch::Degraded {
                    reason: e.to_string(),
                }
            }
        };

        if force_reset {
            tracing::info!(deployment, "Draining worker pool before restart");
            cluster.scale_pool(deployment, 0).await?;
            self.await_pool(Convergence::Drained).await?;
        }

        cluster.scale_pool(deployment, target).await?;
        let status = self.await_pool(Convergence::AtLeast(target)).await?;

        tracing::info!(
            deployment,
            replicas = target,
            available = status.available,
            "Worker pool converged"
        );

        Ok(CapacityOutcome {
            state: WorkerPoolState {
                desired_replicas: target,
                autoscaler_min: bounds.min,
                autoscaler_max: bounds.max,
                available_replicas: status.available,
            },
            scaler,
        })
    }

    async fn await_pool(&self, goal: Convergence) -> BenchResult<PoolStatus> {
        let cluster = self.ctx.cluster();
        let deployment = self.ctx.config().cluster.deployment.as_str();
        let mut timer = self.ctx.poll_timer(self.ctx.config().timing.capacity_timeout);

        let outcome = poll_until(&mut timer, move || async move {
            let status = cluster.pool_status(deployment).await?;
            tracing::debug!(
                deployment,
                desired = status.desired,
                available = status.available,
                "Polled worker pool"
            );
            Ok::<_, BenchError>(goal.reached(status).then_some(status))
        })
        .await?;

        outcome.into_result(goal.describe(deployment))
    }
}
