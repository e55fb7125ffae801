// src/actuator/stepper.rs - Host-side proxy for one stepper controller
use super::link::{Delivery, Endpoint, Link};
use super::wire::{self, MotionTarget};
use super::{Actuator, ActuatorError, ActuatorState, SegmentCompleteSink, SegmentPayload};
use crate::config::ActuatorConfig;
use crate::motion::resolve_modal;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// The firmware integrator emits at most one step per tick.
pub const MAX_STEPS_PER_SECOND: f64 = 4000.0;
pub const DEFAULT_SPU: f64 = 20.0;
pub const DEFAULT_ABS_MAX_ACCEL: f64 = 10_000.0;
const DEFAULT_ACCEL: f64 = 100.0;

#[derive(Debug, Clone)]
struct ProxySettings {
    /// Steps per machine unit.
    spu: f64,
    abs_max_velocity: f64,
    abs_max_accel: f64,
    last_vel: f64,
    last_accel: f64,
}

/// Drives one stepper controller over a [`Link`].
///
/// Positions, velocities and accelerations are in machine units on this side
/// and in steps on the wire.
pub struct StepperProxy<L: Link> {
    name: String,
    link: L,
    settings: Mutex<ProxySettings>,
    poll_interval: Duration,
    motion_end_epsilon: f64,
    motion_timeout: Option<Duration>,
}

impl<L: Link> StepperProxy<L> {
    pub fn new(name: impl Into<String>, link: L, config: &ActuatorConfig) -> Self {
        let abs_max_velocity = MAX_STEPS_PER_SECOND / DEFAULT_SPU;
        Self {
            name: name.into(),
            link,
            settings: Mutex::new(ProxySettings {
                spu: DEFAULT_SPU,
                abs_max_velocity,
                abs_max_accel: DEFAULT_ABS_MAX_ACCEL,
                last_vel: abs_max_velocity,
                last_accel: DEFAULT_ACCEL,
            }),
            poll_interval: config.poll_interval(),
            motion_end_epsilon: config.motion_end_epsilon,
            motion_timeout: config.motion_timeout(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn spu(&self) -> f64 {
        self.settings().spu
    }

    /// Sets steps-per-unit and pulls the velocity limit under the step-rate ceiling.
    pub fn set_spu(&self, spu: f64) -> Result<(), ActuatorError> {
        if !(spu > 0.0 && spu.is_finite()) {
            return Err(ActuatorError::InvalidMotion(format!("spu must be positive, got {spu}")));
        }
        let mut s = self.settings();
        s.spu = spu;
        let ceiling = MAX_STEPS_PER_SECOND / spu;
        if s.abs_max_velocity > ceiling {
            s.abs_max_velocity = ceiling;
        }
        tracing::info!(
            "{}: spu {} gives abs-max velocity {:.3} u/s",
            self.name, spu, s.abs_max_velocity
        );
        Ok(())
    }

    pub fn set_abs_max_velocity(&self, max_velocity: f64) -> Result<(), ActuatorError> {
        if !(max_velocity > 0.0 && max_velocity.is_finite()) {
            return Err(ActuatorError::InvalidMotion(format!(
                "abs-max velocity must be positive, got {max_velocity}"
            )));
        }
        let mut s = self.settings();
        let ceiling = MAX_STEPS_PER_SECOND / s.spu;
        if max_velocity > ceiling {
            tracing::warn!(
                "{}: abs-max velocity {} exceeds step-rate ceiling, using {:.3}",
                self.name, max_velocity, ceiling
            );
        }
        s.abs_max_velocity = max_velocity.min(ceiling);
        Ok(())
    }

    pub fn set_abs_max_accel(&self, max_accel: f64) -> Result<(), ActuatorError> {
        if !(max_accel > 0.0 && max_accel.is_finite()) {
            return Err(ActuatorError::InvalidMotion(format!(
                "abs-max acceleration must be positive, got {max_accel}"
            )));
        }
        self.settings().abs_max_accel = max_accel;
        Ok(())
    }

    /// Modal velocity used when a move omits one, clamped to the hard limit.
    pub fn set_velocity(&self, vel: f64) {
        let mut s = self.settings();
        s.last_vel = vel.min(s.abs_max_velocity);
    }

    pub fn set_accel(&self, accel: f64) {
        let mut s = self.settings();
        s.last_accel = accel.min(s.abs_max_accel);
    }

    /// Moves by `delta` from wherever the controller currently is.
    pub async fn relative(&self, delta: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError> {
        if !delta.is_finite() {
            return Err(ActuatorError::InvalidMotion(format!("delta must be finite, got {delta}")));
        }
        let start = self.get_state().await?.pos;
        self.absolute(start + delta, vel, accel).await
    }

    /// Writes the driver current scale (0..=1).
    pub async fn set_cscale(&self, cscale: f64) -> Result<(), ActuatorError> {
        if !(0.0..=1.0).contains(&cscale) {
            return Err(ActuatorError::InvalidMotion(format!(
                "current scale must be within 0..=1, got {cscale}"
            )));
        }
        let datagram = wire::encode_f32(cscale as f32);
        self.link.write(Endpoint::Settings, &datagram, Delivery::Acked).await?;
        Ok(())
    }

    fn settings(&self) -> MutexGuard<'_, ProxySettings> {
        match self.settings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn poll_until_stopped(&self) -> Result<(), ActuatorError> {
        loop {
            let state = self.get_state().await?;
            tracing::trace!(
                "{}\t acc {:.4},\t vel {:.4},\t pos {:.4}",
                self.name, state.accel, state.vel, state.pos
            );
            if state.vel.abs() < self.motion_end_epsilon {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<L: Link> Actuator for StepperProxy<L> {
    async fn transmit_planned_segment(&self, segment: &SegmentPayload) -> Result<(), ActuatorError> {
        let datagram = wire::encode_segment(segment);
        tracing::trace!("{}: segment {} out", self.name, segment.segment_number);
        self.link.write(Endpoint::Queue, &datagram, Delivery::Ackless).await?;
        Ok(())
    }

    async fn target(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError> {
        let target = {
            let mut s = self.settings();
            let invalid = |e: crate::motion::MotionError| ActuatorError::InvalidMotion(e.to_string());
            let mut vel = resolve_modal(vel, s.last_vel, "velocity").map_err(invalid)?;
            let mut accel = resolve_modal(accel, s.last_accel, "acceleration").map_err(invalid)?;
            if accel > s.abs_max_accel {
                accel = s.abs_max_accel;
            }
            if vel > s.abs_max_velocity {
                vel = s.abs_max_velocity;
            }
            if vel <= 0.0 || accel <= 0.0 {
                return Err(ActuatorError::InvalidMotion(format!(
                    "position move needs positive velocity and acceleration, have {vel} and {accel}"
                )));
            }
            s.last_vel = vel;
            s.last_accel = accel;
            MotionTarget::Position {
                pos: (pos * s.spu) as f32,
                vel: (vel * s.spu) as f32,
                accel: (accel * s.spu) as f32,
            }
        };
        tracing::debug!("{}: target {:.4}", self.name, pos);
        self.link
            .write(Endpoint::TargetData, &wire::encode_target(&target), Delivery::Acked)
            .await?;
        Ok(())
    }

    async fn absolute(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError> {
        self.target(pos, vel, accel).await?;
        self.await_motion_end().await?;
        tracing::debug!("{}: absolute move to {:.4} done", self.name, pos);
        Ok(())
    }

    async fn velocity(&self, vel: f64, accel: Option<f64>) -> Result<(), ActuatorError> {
        if !vel.is_finite() {
            return Err(ActuatorError::InvalidMotion(format!("velocity must be finite, got {vel}")));
        }
        let target = {
            let mut s = self.settings();
            let mut accel = resolve_modal(accel, s.last_accel, "acceleration")
                .map_err(|e| ActuatorError::InvalidMotion(e.to_string()))?;
            if accel > s.abs_max_accel {
                accel = s.abs_max_accel;
            }
            s.last_accel = accel;
            // the modal velocity is left alone: this path is mostly used to stop
            let vel = vel.clamp(-s.abs_max_velocity, s.abs_max_velocity);
            MotionTarget::Velocity {
                vel: (vel * s.spu) as f32,
                accel: (accel * s.spu) as f32,
            }
        };
        self.link
            .write(Endpoint::TargetData, &wire::encode_target(&target), Delivery::Acked)
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ActuatorError> {
        self.velocity(0.0, None).await?;
        self.await_motion_end().await
    }

    async fn set_position(&self, pos: f64) -> Result<(), ActuatorError> {
        // halting also swaps the firmware to velocity mode, so it won't slew
        self.stop().await?;
        let steps = (pos * self.spu()) as f32;
        self.link
            .write(Endpoint::SetPosition, &wire::encode_f32(steps), Delivery::Acked)
            .await?;
        Ok(())
    }

    async fn get_state(&self) -> Result<ActuatorState, ActuatorError> {
        let data = self.link.query(Endpoint::MotionState).await?;
        let (pos, vel, accel) = wire::decode_state(&data)?;
        let spu = self.spu();
        Ok(ActuatorState {
            pos: pos as f64 / spu,
            vel: vel as f64 / spu,
            accel: accel as f64 / spu,
        })
    }

    async fn await_motion_end(&self) -> Result<(), ActuatorError> {
        match self.motion_timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_until_stopped())
                .await
                .map_err(|_| ActuatorError::MotionTimeout(limit))?,
            None => self.poll_until_stopped().await,
        }
    }

    fn abs_max_velocity(&self) -> f64 {
        self.settings().abs_max_velocity
    }

    fn abs_max_accel(&self) -> f64 {
        self.settings().abs_max_accel
    }

    fn attach_segment_complete(&self, sink: SegmentCompleteSink) {
        let name = self.name.clone();
        self.link.on_data(
            Endpoint::SegmentComplete,
            Box::new(move |data| match wire::decode_segment_complete(data) {
                Ok(number) => {
                    if !sink.notify(number) {
                        tracing::debug!("{}: segment {} complete, nobody listening", name, number);
                    }
                }
                Err(e) => tracing::warn!("{}: bad segment-complete datagram: {}", name, e),
            }),
        );
    }
}
