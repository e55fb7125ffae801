// src/motion/fanout.rs - Run one operation on every actuator and wait for all of them
use super::MotionError;
use crate::actuator::ActuatorError;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;

/// One actuator's share of a failed fan-out.
#[derive(Debug)]
pub struct AxisFailure {
    pub actuator: usize,
    pub error: ActuatorError,
}

/// Failed branches and the branches that finished fine alongside them.
#[derive(Debug)]
pub struct FanOutError {
    pub failures: Vec<AxisFailure>,
    pub completed: Vec<usize>,
}

impl FanOutError {
    /// `moves` marks operations that command motion; for those, a completed
    /// branch or an unacknowledged failure means some axis may be moving.
    pub fn into_motion_error(self, operation: &'static str, moves: bool) -> MotionError {
        let motion_started = moves
            && (!self.completed.is_empty() || self.failures.iter().any(|f| f.error.may_have_moved()));
        MotionError::Dispatch {
            operation,
            failures: self.failures,
            completed: self.completed,
            motion_started,
        }
    }
}

/// Runs `op` for every actuator concurrently. Every branch runs to completion,
/// even after one of them fails.
pub async fn fan_out<A, T, F, Fut>(actuators: &[Arc<A>], mut op: F) -> Result<Vec<T>, FanOutError>
where
    A: ?Sized,
    F: FnMut(usize, Arc<A>) -> Fut,
    Fut: Future<Output = Result<T, ActuatorError>>,
{
    let branches = actuators
        .iter()
        .enumerate()
        .map(|(i, actuator)| op(i, Arc::clone(actuator)));
    let results = join_all(branches).await;

    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut completed = Vec::new();
    for (actuator, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => {
                completed.push(actuator);
                values.push(value);
            }
            Err(error) => {
                tracing::warn!("Actuator {} failed: {}", actuator, error);
                failures.push(AxisFailure { actuator, error });
            }
        }
    }
    if failures.is_empty() {
        Ok(values)
    } else {
        Err(FanOutError { failures, completed })
    }
}
