// src/motion/coordinator.rs - Synchronized motion over a fixed set of actuators
use super::fanout::fan_out;
use super::limits::{AxisLimits, ScaledMove};
use super::queue::{HaltReason, QueueState, QueueStats, SegmentPlan};
use super::scheduler::{SchedulerHandle, spawn_scheduler};
use super::vector::{add, distance, pad_to_dof, unit_of, unit_vector};
use super::{MotionError, resolve_modal};
use crate::actuator::{Actuator, MAX_DOF, SegmentCompleteSink};
use crate::config::CoordinatorConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drives N actuators as one machine.
///
/// Direct moves (`absolute`, `relative`, `velocity`) are scaled so that no axis
/// exceeds its own limits, then fanned out to every actuator. Queued moves go
/// through the segment scheduler, which streams them to the actuators' embedded
/// queues.
///
/// Commands take `&mut self`; one caller drives a machine at a time.
pub struct Coordinator<A: Actuator + ?Sized + 'static> {
    actuators: Vec<Arc<A>>,
    scheduler: SchedulerHandle,
    last_vel: f64,
    last_accel: f64,
    vi_fraction: f64,
    /// Where the last direct move left the machine.
    last_absolute: Option<Vec<f64>>,
    /// Where the last queued segment ends.
    last_target: Option<[f64; MAX_DOF]>,
}

impl<A: Actuator + ?Sized + 'static> Coordinator<A> {
    /// Wires the actuators' completion streams into a freshly spawned scheduler.
    /// Must be called from within a tokio runtime.
    pub fn new(actuators: Vec<Arc<A>>, config: &CoordinatorConfig) -> Result<Self, MotionError> {
        if actuators.is_empty() || actuators.len() > MAX_DOF {
            return Err(MotionError::Invalid(format!(
                "a machine needs 1 to {} actuators, got {}",
                MAX_DOF,
                actuators.len()
            )));
        }
        config
            .validate()
            .map_err(|e| MotionError::Invalid(e.to_string()))?;

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        for (i, actuator) in actuators.iter().enumerate() {
            actuator.attach_segment_complete(SegmentCompleteSink::new(i, done_tx.clone()));
        }
        let scheduler = spawn_scheduler(actuators.clone(), done_rx, config);
        tracing::info!("Coordinator ready with {} actuators", actuators.len());

        Ok(Self {
            actuators,
            scheduler,
            last_vel: config.default_velocity,
            last_accel: config.default_accel,
            vi_fraction: config.vi_fraction,
            last_absolute: None,
            last_target: None,
        })
    }

    pub fn actuator_count(&self) -> usize {
        self.actuators.len()
    }

    pub fn actuators(&self) -> &[Arc<A>] {
        &self.actuators
    }

    /// Current hard limits, read from every actuator.
    pub fn limits(&self) -> Vec<AxisLimits> {
        self.actuators
            .iter()
            .map(|a| AxisLimits::new(a.abs_max_velocity(), a.abs_max_accel()))
            .collect()
    }

    pub fn last_velocity(&self) -> f64 {
        self.last_vel
    }

    pub fn last_accel(&self) -> f64 {
        self.last_accel
    }

    pub fn set_velocity(&mut self, vel: f64) -> Result<(), MotionError> {
        self.last_vel = positive(vel, "velocity")?;
        Ok(())
    }

    pub fn set_accel(&mut self, accel: f64) -> Result<(), MotionError> {
        self.last_accel = positive(accel, "acceleration")?;
        Ok(())
    }

    fn check_vector(&self, v: &[f64]) -> Result<(), MotionError> {
        if v.len() != self.actuators.len() {
            return Err(MotionError::DimensionMismatch {
                expected: self.actuators.len(),
                got: v.len(),
            });
        }
        if let Some(bad) = v.iter().find(|x| !x.is_finite()) {
            return Err(MotionError::Invalid(format!("non-finite component {bad}")));
        }
        Ok(())
    }

    async fn current_position(&mut self) -> Result<Vec<f64>, MotionError> {
        if let Some(pos) = &self.last_absolute {
            return Ok(pos.clone());
        }
        let pos = self.get_position().await?;
        self.last_absolute = Some(pos.clone());
        Ok(pos)
    }

    /// Limit-scales a move along `unit`. Fails when an axis that has to move
    /// has no usable limits, since the whole move would then stall.
    fn scale(&self, unit: &[f64], vel: f64, accel: f64) -> Result<ScaledMove, MotionError> {
        let limits = self.limits();
        for (i, (component, limit)) in unit.iter().zip(&limits).enumerate() {
            let usable = limit.abs_max_velocity > 0.0 && limit.abs_max_accel > 0.0;
            if *component != 0.0 && !usable {
                return Err(MotionError::Invalid(format!(
                    "actuator {} cannot move with limits {} u/s, {} u/s²",
                    i, limit.abs_max_velocity, limit.abs_max_accel
                )));
            }
        }
        let scaled = ScaledMove::new(unit, vel, accel, &limits);
        let valid = |x: f64| x > 0.0 && x.is_finite();
        if !(valid(scaled.factor) && valid(scaled.velocity) && valid(scaled.accel)) {
            return Err(MotionError::Invalid(format!(
                "limits leave no legal speed (factor {})",
                scaled.factor
            )));
        }
        Ok(scaled)
    }

    /// Halts a non-empty segment queue ahead of a direct command. The
    /// actuators drop their embedded queues when they leave queue mode.
    async fn preempt_queue(&mut self, operation: &'static str) -> Result<(), MotionError> {
        if self.scheduler.halt(HaltReason::Preempted { operation }).await? {
            tracing::info!("{} preempts the segment queue", operation);
            self.last_target = None;
        }
        Ok(())
    }

    /// Plans a straight move to `target` from the end of the previous queued
    /// move and hands it to the scheduler. Returns the segment number.
    pub async fn add_move_to_queue(
        &mut self,
        target: &[f64],
        vel: Option<f64>,
        accel: Option<f64>,
    ) -> Result<u32, MotionError> {
        self.check_vector(target)?;
        let vel = resolve_modal(vel, self.last_vel, "velocity")?;
        let accel = resolve_modal(accel, self.last_accel, "acceleration")?;

        let start = match self.last_target {
            Some(start) => start,
            None => {
                // don't go out to the actuators for a move that can't be queued
                if let QueueState::Halted(reason) = self.scheduler.stats().await?.state {
                    return Err(MotionError::QueueHalted(reason));
                }
                pad_to_dof(&self.current_position().await?)
            }
        };
        let end = pad_to_dof(target);
        let unit = unit_vector(&start, &end).ok_or(MotionError::ZeroLengthMove)?;
        let scaled = self.scale(&unit, vel, accel)?;
        let vi = self.vi_fraction * scaled.velocity;
        let plan = SegmentPlan {
            unit: pad_to_dof(&unit),
            vi,
            vmax: scaled.velocity,
            vf: vi,
            accel: scaled.accel,
            distance: distance(&start, &end),
        };
        let number = self.scheduler.enqueue(plan).await?;

        self.last_vel = vel;
        self.last_accel = accel;
        self.last_target = Some(end);
        // the machine is on its way somewhere else
        self.last_absolute = None;
        Ok(number)
    }

    /// Moves every axis to `pos` in a straight line and waits until all of them
    /// have stopped.
    pub async fn absolute(
        &mut self,
        pos: &[f64],
        vel: Option<f64>,
        accel: Option<f64>,
    ) -> Result<(), MotionError> {
        self.check_vector(pos)?;
        let vel = resolve_modal(vel, self.last_vel, "velocity")?;
        let accel = resolve_modal(accel, self.last_accel, "acceleration")?;
        let start = self.current_position().await?;

        let Some(unit) = unit_vector(&start, pos) else {
            tracing::debug!("Already at {:?}", pos);
            self.last_vel = vel;
            self.last_accel = accel;
            return Ok(());
        };
        let scaled = self.scale(&unit, vel, accel)?;
        self.last_vel = vel;
        self.last_accel = accel;
        self.preempt_queue("absolute").await?;
        tracing::debug!("Absolute move to {:?} at {:.3} u/s", pos, scaled.velocity);

        let dispatched = fan_out(&self.actuators, |i, actuator| {
            let (p, v, a) = (pos[i], scaled.axis_velocities[i], scaled.axis_accels[i]);
            async move { actuator.absolute(p, Some(v), Some(a)).await }
        })
        .await;
        if let Err(e) = dispatched {
            self.last_absolute = None;
            return Err(e.into_motion_error("absolute", true));
        }
        self.last_absolute = Some(pos.to_vec());
        self.last_target = Some(pad_to_dof(pos));
        Ok(())
    }

    pub async fn relative(
        &mut self,
        deltas: &[f64],
        vel: Option<f64>,
        accel: Option<f64>,
    ) -> Result<(), MotionError> {
        self.check_vector(deltas)?;
        let start = self.current_position().await?;
        let target = add(&start, deltas);
        self.absolute(&target, vel, accel).await
    }

    /// Per-axis moves without coordination. Returns once every actuator has
    /// accepted its target; the machine's position is unknown afterwards.
    pub async fn target(
        &mut self,
        pos: &[f64],
        vels: Option<&[f64]>,
        accels: Option<&[f64]>,
    ) -> Result<(), MotionError> {
        self.check_vector(pos)?;
        for values in [vels, accels].into_iter().flatten() {
            self.check_vector(values)?;
            if let Some(bad) = values.iter().find(|v| **v < 0.0) {
                return Err(MotionError::Invalid(format!("negative per-axis limit {bad}")));
            }
        }
        self.preempt_queue("target").await?;
        self.last_absolute = None;
        self.last_target = None;

        fan_out(&self.actuators, |i, actuator| {
            let p = pos[i];
            let v = vels.map(|v| v[i]);
            let a = accels.map(|a| a[i]);
            async move { actuator.target(p, v, a).await }
        })
        .await
        .map_err(|e| e.into_motion_error("target", true))?;
        Ok(())
    }

    /// Velocity-mode move along the direction of `vels`. An all-zero vector
    /// brings every axis to rest at its own deceleration limit.
    pub async fn velocity(&mut self, vels: &[f64], accel: Option<f64>) -> Result<(), MotionError> {
        self.check_vector(vels)?;
        let accel = resolve_modal(accel, self.last_accel, "acceleration")?;
        let limits = self.limits();
        let (axis_vels, axis_accels): (Vec<f64>, Vec<f64>) = match unit_of(vels) {
            Some(unit) => {
                let speed = super::vector::norm(vels);
                let scaled = self.scale(&unit, speed, accel)?;
                let axis_vels = unit.iter().map(|u| u * scaled.velocity).collect();
                (axis_vels, scaled.axis_accels)
            }
            None => (
                vec![0.0; vels.len()],
                limits.iter().map(|l| accel.min(l.abs_max_accel)).collect(),
            ),
        };
        self.preempt_queue("velocity").await?;
        self.last_accel = accel;
        self.last_absolute = None;
        self.last_target = None;

        fan_out(&self.actuators, |i, actuator| {
            let (v, a) = (axis_vels[i], axis_accels[i]);
            async move { actuator.velocity(v, Some(a)).await }
        })
        .await
        .map_err(|e| e.into_motion_error("velocity", true))?;
        Ok(())
    }

    /// Halts the segment queue, brings every axis to rest and re-reads where the
    /// machine ended up.
    pub async fn stop(&mut self) -> Result<(), MotionError> {
        if self.scheduler.halt(HaltReason::Stopped).await? {
            tracing::info!("Stop requested with segments outstanding, queue halted");
        }
        self.last_target = None;
        self.last_absolute = None;

        fan_out(&self.actuators, |_, actuator| async move { actuator.stop().await })
            .await
            .map_err(|e| e.into_motion_error("stop", true))?;

        let pos = self.get_position().await?;
        tracing::debug!("Stopped at {:?}", pos);
        self.last_absolute = Some(pos);
        Ok(())
    }

    pub async fn set_position(&mut self, pos: &[f64]) -> Result<(), MotionError> {
        self.check_vector(pos)?;
        self.preempt_queue("set_position").await?;
        let dispatched = fan_out(&self.actuators, |i, actuator| {
            let p = pos[i];
            async move { actuator.set_position(p).await }
        })
        .await;
        if let Err(e) = dispatched {
            self.last_absolute = None;
            self.last_target = None;
            return Err(e.into_motion_error("set_position", true));
        }
        self.last_absolute = Some(pos.to_vec());
        self.last_target = Some(pad_to_dof(pos));
        Ok(())
    }

    pub async fn get_position(&self) -> Result<Vec<f64>, MotionError> {
        fan_out(&self.actuators, |_, actuator| async move { actuator.get_position().await })
            .await
            .map_err(|e| e.into_motion_error("get_position", false))
    }

    pub async fn get_velocity(&self) -> Result<Vec<f64>, MotionError> {
        fan_out(&self.actuators, |_, actuator| async move { actuator.get_velocity().await })
            .await
            .map_err(|e| e.into_motion_error("get_velocity", false))
    }

    pub async fn await_motion_end(&self) -> Result<(), MotionError> {
        fan_out(&self.actuators, |_, actuator| async move { actuator.await_motion_end().await })
            .await
            .map_err(|e| e.into_motion_error("await_motion_end", false))?;
        Ok(())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, MotionError> {
        self.scheduler.stats().await
    }

    /// Waits until every queued segment has been completed by every actuator.
    pub async fn drain_queue(&self) -> Result<(), MotionError> {
        self.scheduler.drain().await
    }

    /// Clears a halted queue. The next queued move plans from a freshly read
    /// position. Returns whether the queue was halted; a queue that wasn't is
    /// left alone.
    pub async fn resume_queue(&mut self) -> Result<bool, MotionError> {
        let was_halted = self.scheduler.resume().await?;
        if was_halted {
            self.last_target = None;
            self.last_absolute = None;
        }
        Ok(was_halted)
    }
}

fn positive(value: f64, what: &str) -> Result<f64, MotionError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(MotionError::Invalid(format!("{what} must be positive, got {value}")))
    }
}
