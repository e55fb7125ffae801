// src/motion/mod.rs - Synchronized multi-actuator motion
pub mod coordinator;
pub mod fanout;
pub mod limits;
pub mod queue;
pub mod scheduler;
pub mod vector;

pub use coordinator::Coordinator;
pub use fanout::AxisFailure;
pub use limits::{AxisLimits, ScaledMove, scale_factor};
pub use queue::{HaltReason, PlannedSegment, QueueState, QueueStats, SegmentPlan, SegmentQueue};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Invalid motion request: {0}")]
    Invalid(String),
    #[error("Expected a vector of {expected} values, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Zero-length move: direction is undefined")]
    ZeroLengthMove,
    #[error(
        "{operation} failed on {} of {} actuators (motion may have started: {motion_started})",
        .failures.len(),
        .failures.len() + .completed.len()
    )]
    Dispatch {
        operation: &'static str,
        failures: Vec<AxisFailure>,
        /// Actuators whose branch succeeded before the failure was reported.
        completed: Vec<usize>,
        /// Some axis may have moved; query the position before retrying.
        motion_started: bool,
    },
    #[error("Segment queue halted: {0}")]
    QueueHalted(HaltReason),
    #[error("Segment scheduler is no longer running")]
    SchedulerClosed,
}

/// Resolves a modal velocity or acceleration.
///
/// `None` and zero both mean "use the previous value". Anything else must be a
/// positive finite number.
pub fn resolve_modal(requested: Option<f64>, last: f64, what: &str) -> Result<f64, MotionError> {
    match requested {
        None => Ok(last),
        Some(v) if v == 0.0 => Ok(last),
        Some(v) if v > 0.0 && v.is_finite() => Ok(v),
        Some(v) => Err(MotionError::Invalid(format!("{what} must be positive, got {v}"))),
    }
}
