// src/sim/controller.rs - Step-level model of one embedded stepper controller
//
// Everything in here is in steps and seconds, as the firmware sees it. The
// controller is advanced by `tick` and knows nothing about time otherwise.

use crate::actuator::link::Endpoint;
use crate::actuator::wire::{self, MotionTarget};
use crate::actuator::{MAX_DOF, SegmentPayload};
use crate::config::REMOTE_QUEUE_CAPACITY;
use std::collections::VecDeque;

const POS_EPSILON: f64 = 0.01;

/// Latched when the embedded queue refuses a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueHalt {
    OutOfOrder { expected: u32, got: u32 },
    Overflow { segment: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimMode {
    Position { target: f64, vmax: f64, accel: f64 },
    Velocity { target: f64, accel: f64 },
    Queue,
}

/// Progress through the segment at the head of the queue, in path units.
#[derive(Debug, Clone)]
struct ActiveSegment {
    segment: SegmentPayload,
    travelled: f64,
}

#[derive(Debug, Clone)]
pub struct SimController {
    /// Which component of a segment's unit vector drives this axis.
    axis: usize,
    /// Steps per machine unit, for the path-unit segment fields.
    spu: f64,
    mode: SimMode,
    pos: f64,
    vel: f64,
    accel: f64,
    /// Path speed carried between segments, units/s.
    path_speed: f64,
    queue: VecDeque<SegmentPayload>,
    active: Option<ActiveSegment>,
    expected: Option<u32>,
    halt: Option<QueueHalt>,
    cscale: f32,
}

fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    if current < target {
        (current + max_step).min(target)
    } else {
        (current - max_step).max(target)
    }
}

impl SimController {
    pub fn new(axis: usize, spu: f64) -> Self {
        Self {
            axis: axis.min(MAX_DOF - 1),
            spu,
            mode: SimMode::Velocity {
                target: 0.0,
                accel: 0.0,
            },
            pos: 0.0,
            vel: 0.0,
            accel: 0.0,
            path_speed: 0.0,
            queue: VecDeque::with_capacity(REMOTE_QUEUE_CAPACITY),
            active: None,
            expected: None,
            halt: None,
            cscale: 1.0,
        }
    }

    pub fn mode(&self) -> SimMode {
        self.mode
    }

    /// Position in steps.
    pub fn position(&self) -> f64 {
        self.pos
    }

    /// Velocity in steps/s.
    pub fn velocity(&self) -> f64 {
        self.vel
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len() + usize::from(self.active.is_some())
    }

    pub fn halt(&self) -> Option<QueueHalt> {
        self.halt
    }

    pub fn cscale(&self) -> f32 {
        self.cscale
    }

    /// Applies one inbound datagram. The error string is what the firmware
    /// would report back as a fault.
    pub fn handle_write(&mut self, endpoint: Endpoint, datagram: &[u8]) -> Result<(), String> {
        match endpoint {
            Endpoint::TargetData => {
                let target = wire::decode_target(datagram).map_err(|e| e.to_string())?;
                self.flush_queue();
                match target {
                    MotionTarget::Position { pos, vel, accel } => {
                        if vel <= 0.0 || accel <= 0.0 {
                            return Err(format!("position target needs positive rates, got {vel}, {accel}"));
                        }
                        self.mode = SimMode::Position {
                            target: pos as f64,
                            vmax: vel as f64,
                            accel: accel as f64,
                        };
                    }
                    MotionTarget::Velocity { vel, accel } => {
                        if accel <= 0.0 {
                            return Err(format!("velocity target needs positive accel, got {accel}"));
                        }
                        self.mode = SimMode::Velocity {
                            target: vel as f64,
                            accel: accel as f64,
                        };
                    }
                }
                Ok(())
            }
            Endpoint::SetPosition => {
                let pos = wire::decode_f32(datagram).map_err(|e| e.to_string())? as f64;
                self.pos = pos;
                if let SimMode::Position { target, .. } = &mut self.mode {
                    *target = pos;
                }
                Ok(())
            }
            Endpoint::Settings => {
                self.cscale = wire::decode_f32(datagram).map_err(|e| e.to_string())?;
                Ok(())
            }
            Endpoint::Queue => {
                let segment = wire::decode_segment(datagram).map_err(|e| e.to_string())?;
                self.accept_segment(segment);
                Ok(())
            }
            Endpoint::MotionState | Endpoint::SegmentComplete => {
                Err(format!("{endpoint:?} does not take writes"))
            }
        }
    }

    pub fn handle_query(&self, endpoint: Endpoint) -> Result<Vec<u8>, String> {
        match endpoint {
            Endpoint::MotionState => Ok(wire::encode_state(
                self.pos as f32,
                self.vel as f32,
                self.accel as f32,
            )),
            other => Err(format!("{other:?} cannot be queried")),
        }
    }

    fn flush_queue(&mut self) {
        if self.queue_len() > 0 {
            tracing::debug!("axis {}: mode switch drops {} segments", self.axis, self.queue_len());
        }
        self.queue.clear();
        self.active = None;
        self.expected = None;
        self.halt = None;
        self.path_speed = 0.0;
    }

    fn accept_segment(&mut self, segment: SegmentPayload) {
        if self.halt.is_some() {
            return;
        }
        let number = segment.segment_number;
        if let Some(expected) = self.expected {
            if number != expected {
                tracing::warn!("axis {}: segment {} arrived, expected {}", self.axis, number, expected);
                self.halt = Some(QueueHalt::OutOfOrder { expected, got: number });
                return;
            }
        }
        if self.queue_len() >= REMOTE_QUEUE_CAPACITY {
            tracing::warn!("axis {}: queue full, segment {} refused", self.axis, number);
            self.halt = Some(QueueHalt::Overflow { segment: number });
            return;
        }
        if self.mode != SimMode::Queue {
            self.mode = SimMode::Queue;
            self.path_speed = 0.0;
        }
        self.expected = Some(number.wrapping_add(1));
        self.queue.push_back(segment);
    }

    /// Advances the model by `dt` seconds. Returns the numbers of segments
    /// finished during this tick.
    pub fn tick(&mut self, dt: f64) -> Vec<u32> {
        let before = self.vel;
        let mut completed = Vec::new();
        match self.mode {
            SimMode::Position { target, vmax, accel } => {
                let remaining = target - self.pos;
                if remaining.abs() < POS_EPSILON && self.vel.abs() < accel * dt {
                    self.pos = target;
                    self.vel = 0.0;
                } else {
                    let desired = remaining.signum() * vmax.min((2.0 * accel * remaining.abs()).sqrt());
                    let vel = approach(self.vel, desired, accel * dt);
                    let step = vel * dt;
                    if step.signum() == remaining.signum() && step.abs() >= remaining.abs() {
                        self.pos = target;
                        self.vel = 0.0;
                    } else {
                        self.pos += step;
                        self.vel = vel;
                    }
                }
            }
            SimMode::Velocity { target, accel } => {
                self.vel = approach(self.vel, target, accel * dt);
                self.pos += self.vel * dt;
            }
            SimMode::Queue => self.run_queue(dt, &mut completed),
        }
        self.accel = (self.vel - before) / dt;
        completed
    }

    fn run_queue(&mut self, dt: f64, completed: &mut Vec<u32>) {
        if self.active.is_none() {
            if self.halt.is_some() {
                self.path_speed = 0.0;
                self.vel = 0.0;
                return;
            }
            match self.queue.pop_front() {
                Some(segment) => self.active = Some(ActiveSegment { segment, travelled: 0.0 }),
                None => {
                    // starved
                    self.path_speed = 0.0;
                    self.vel = 0.0;
                    return;
                }
            }
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let seg = &active.segment;
        let remaining = (seg.distance - active.travelled).max(0.0);
        let exit = if seg.is_last { 0.0 } else { seg.vf };
        let braking = (exit * exit + 2.0 * seg.accel * remaining).sqrt();
        let desired = seg.vmax.min(braking);
        self.path_speed = if self.path_speed < desired {
            (self.path_speed + seg.accel * dt).min(desired)
        } else {
            desired
        };
        let ds = (self.path_speed * dt).min(remaining);
        let component = seg.unit[self.axis];
        active.travelled += ds;
        self.pos += component * ds * self.spu;
        self.vel = component * self.path_speed * self.spu;

        if seg.distance - active.travelled <= 1e-9 {
            let number = seg.segment_number;
            let is_last = seg.is_last;
            self.active = None;
            completed.push(number);
            if is_last && self.queue.is_empty() {
                self.path_speed = 0.0;
                self.vel = 0.0;
            }
        }
    }
}
