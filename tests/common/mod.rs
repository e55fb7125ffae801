// Shared test doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axl_rs::actuator::{
    Actuator, ActuatorError, ActuatorState, Endpoint, LinkError, SegmentCompleteSink, SegmentPayload,
};
use axl_rs::config::CoordinatorConfig;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Transmit(SegmentPayload),
    Target {
        pos: f64,
        vel: Option<f64>,
        accel: Option<f64>,
    },
    Absolute {
        pos: f64,
        vel: Option<f64>,
        accel: Option<f64>,
    },
    Velocity {
        vel: f64,
        accel: Option<f64>,
    },
    Stop,
    SetPosition(f64),
    GetState,
    AwaitMotionEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Failure {
    NotSent,
    NoAck,
}

/// Actuator that records every call and moves instantly.
pub struct RecordingActuator {
    abs_max_velocity: f64,
    abs_max_accel: f64,
    state: Mutex<ActuatorState>,
    calls: Mutex<Vec<Call>>,
    sink: Mutex<Option<SegmentCompleteSink>>,
    auto_complete: Mutex<bool>,
    failure: Mutex<Option<Failure>>,
}

impl RecordingActuator {
    pub fn new(abs_max_velocity: f64, abs_max_accel: f64) -> Self {
        Self {
            abs_max_velocity,
            abs_max_accel,
            state: Mutex::new(ActuatorState::default()),
            calls: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            auto_complete: Mutex::new(false),
            failure: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn transmitted(&self) -> Vec<SegmentPayload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Transmit(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn set_position_state(&self, pos: f64) {
        self.state.lock().unwrap().pos = pos;
    }

    pub fn velocity_state(&self) -> f64 {
        self.state.lock().unwrap().vel
    }

    /// Report every transmitted segment as finished straight away.
    pub fn set_auto_complete(&self, on: bool) {
        *self.auto_complete.lock().unwrap() = on;
    }

    pub fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Sends a segment-complete notification as the embedded side would.
    pub fn complete(&self, segment_number: u32) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.notify(segment_number);
        }
    }

    fn record(&self, call: Call) -> Result<(), ActuatorError> {
        self.calls.lock().unwrap().push(call);
        match *self.failure.lock().unwrap() {
            None => Ok(()),
            Some(Failure::NotSent) => Err(LinkError::NotSent {
                endpoint: Endpoint::TargetData,
                reason: "link down".into(),
            }
            .into()),
            Some(Failure::NoAck) => Err(LinkError::NoAck {
                endpoint: Endpoint::TargetData,
                timeout: Duration::from_millis(100),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn transmit_planned_segment(&self, segment: &SegmentPayload) -> Result<(), ActuatorError> {
        self.record(Call::Transmit(segment.clone()))?;
        if *self.auto_complete.lock().unwrap() {
            let sink = self.sink.lock().unwrap().clone();
            if let Some(sink) = sink {
                let mut state = self.state.lock().unwrap();
                state.pos += segment.unit[sink.actuator()] * segment.distance;
                sink.notify(segment.segment_number);
            }
        }
        Ok(())
    }

    async fn target(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError> {
        self.record(Call::Target { pos, vel, accel })?;
        self.state.lock().unwrap().pos = pos;
        Ok(())
    }

    async fn absolute(&self, pos: f64, vel: Option<f64>, accel: Option<f64>) -> Result<(), ActuatorError> {
        self.record(Call::Absolute { pos, vel, accel })?;
        let mut state = self.state.lock().unwrap();
        state.pos = pos;
        state.vel = 0.0;
        Ok(())
    }

    async fn velocity(&self, vel: f64, accel: Option<f64>) -> Result<(), ActuatorError> {
        self.record(Call::Velocity { vel, accel })?;
        self.state.lock().unwrap().vel = vel;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ActuatorError> {
        self.record(Call::Stop)?;
        self.state.lock().unwrap().vel = 0.0;
        Ok(())
    }

    async fn set_position(&self, pos: f64) -> Result<(), ActuatorError> {
        self.record(Call::SetPosition(pos))?;
        let mut state = self.state.lock().unwrap();
        state.pos = pos;
        state.vel = 0.0;
        Ok(())
    }

    async fn get_state(&self) -> Result<ActuatorState, ActuatorError> {
        self.record(Call::GetState)?;
        Ok(*self.state.lock().unwrap())
    }

    async fn await_motion_end(&self) -> Result<(), ActuatorError> {
        self.record(Call::AwaitMotionEnd)
    }

    fn abs_max_velocity(&self) -> f64 {
        self.abs_max_velocity
    }

    fn abs_max_accel(&self) -> f64 {
        self.abs_max_accel
    }

    fn attach_segment_complete(&self, sink: SegmentCompleteSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

/// Coordinator settings with a short start delay and no ack timeout.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        queue_start_delay_ms: 50,
        ack_timeout_ms: None,
        ..CoordinatorConfig::default()
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
