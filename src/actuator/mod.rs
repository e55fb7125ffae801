// src/actuator/mod.rs - The per-axis proxy contract the coordinator drives
pub mod link;
pub mod stepper;
pub mod wire;

pub use link::{Delivery, Endpoint, Link, LinkError};
pub use stepper::StepperProxy;
pub use wire::WireError;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Width of every motion vector on the wire. Unused axes are zero.
pub const MAX_DOF: usize = 7;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),
    #[error("Invalid motion request: {0}")]
    InvalidMotion(String),
    #[error("Motion did not end within {0:?}")]
    MotionTimeout(Duration),
}

impl ActuatorError {
    /// Whether the remote controller may have acted on the request.
    ///
    /// A write that was sent but never acknowledged might have landed; so might
    /// a move that was still running when the wait gave up.
    pub fn may_have_moved(&self) -> bool {
        matches!(
            self,
            ActuatorError::Link(LinkError::NoAck { .. }) | ActuatorError::MotionTimeout(_)
        )
    }
}

/// Snapshot of the remote motion state, in machine units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorState {
    pub pos: f64,
    pub vel: f64,
    pub accel: f64,
}

/// One planned segment as the embedded queue receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPayload {
    pub segment_number: u32,
    pub is_last: bool,
    pub unit: [f64; MAX_DOF],
    /// Entry velocity.
    pub vi: f64,
    pub accel: f64,
    pub vmax: f64,
    /// Exit velocity.
    pub vf: f64,
    pub distance: f64,
}

/// A "segment complete" notification from one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentComplete {
    pub actuator: usize,
    pub segment_number: u32,
}

/// Where an actuator reports finished segments.
///
/// The coordinator hands one sink to each actuator, tagged with that actuator's
/// index; all sinks feed the same scheduler channel.
#[derive(Debug, Clone)]
pub struct SegmentCompleteSink {
    actuator: usize,
    tx: mpsc::UnboundedSender<SegmentComplete>,
}

impl SegmentCompleteSink {
    pub fn new(actuator: usize, tx: mpsc::UnboundedSender<SegmentComplete>) -> Self {
        Self { actuator, tx }
    }

    pub fn actuator(&self) -> usize {
        self.actuator
    }

    /// Forwards a completion. Returns `false` once the scheduler is gone.
    pub fn notify(&self, segment_number: u32) -> bool {
        self.tx
            .send(SegmentComplete {
                actuator: self.actuator,
                segment_number,
            })
            .is_ok()
    }
}

/// Host-side proxy for one remote actuator.
///
/// Velocities and accelerations passed as `None` (or zero) fall back to the
/// proxy's own modal values, clamped to its hard limits.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Queues a planned segment on the remote controller. Ackless: the remote
    /// side reports progress through segment-complete notifications instead.
    async fn transmit_planned_segment(&self, segment: &SegmentPayload) -> Result<(), ActuatorError>;

    /// Points the actuator at `pos` and returns once the command is acknowledged.
    async fn target(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError>;

    /// Like [`Actuator::target`], then waits for motion to end.
    async fn absolute(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError>;

    /// Velocity-mode move. Does not touch the modal velocity.
    async fn velocity(&self, vel: f64, accel: Option<f64>) -> Result<(), ActuatorError>;

    /// Commands zero velocity and waits for the axis to come to rest.
    async fn stop(&self) -> Result<(), ActuatorError>;

    async fn set_position(&self, pos: f64) -> Result<(), ActuatorError>;

    async fn get_state(&self) -> Result<ActuatorState, ActuatorError>;

    async fn get_position(&self) -> Result<f64, ActuatorError> {
        Ok(self.get_state().await?.pos)
    }

    async fn get_velocity(&self) -> Result<f64, ActuatorError> {
        Ok(self.get_state().await?.vel)
    }

    async fn await_motion_end(&self) -> Result<(), ActuatorError>;

    fn abs_max_velocity(&self) -> f64;

    fn abs_max_accel(&self) -> f64;

    /// Registers where segment-complete notifications should go.
    fn attach_segment_complete(&self, sink: SegmentCompleteSink);
}
