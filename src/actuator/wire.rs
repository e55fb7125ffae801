// src/actuator/wire.rs - Byte layouts of the stepper firmware endpoints
//
// Every field is little-endian. Floats travel as f32; the firmware has no use
// for double precision.

use super::{MAX_DOF, SegmentPayload};
use thiserror::Error;

pub const MODE_POSITION: u8 = 0;
pub const MODE_VELOCITY: u8 = 1;

/// u32 number, u8 last-flag, unit vector, then vi/accel/vmax/vf/distance.
pub const SEGMENT_DATAGRAM_LEN: usize = 4 + 1 + MAX_DOF * 4 + 5 * 4;
pub const POSITION_TARGET_LEN: usize = 1 + 3 * 4;
pub const VELOCITY_TARGET_LEN: usize = 1 + 2 * 4;
pub const STATE_LEN: usize = 3 * 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Datagram truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("Unknown motion mode {0}")]
    UnknownMode(u8),
}

/// A target write as carried on the wire, already in steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionTarget {
    Position { pos: f32, vel: f32, accel: f32 },
    Velocity { vel: f32, accel: f32 },
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], need: usize) -> Result<Self, WireError> {
        if data.len() < need {
            return Err(WireError::Truncated {
                need,
                got: data.len(),
            });
        }
        Ok(Self { data, pos: 0 })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

pub fn encode_segment(segment: &SegmentPayload) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(SEGMENT_DATAGRAM_LEN);
    datagram.extend_from_slice(&segment.segment_number.to_le_bytes());
    datagram.push(segment.is_last as u8);
    for component in segment.unit {
        datagram.extend_from_slice(&(component as f32).to_le_bytes());
    }
    for value in [segment.vi, segment.accel, segment.vmax, segment.vf, segment.distance] {
        datagram.extend_from_slice(&(value as f32).to_le_bytes());
    }
    datagram
}

pub fn decode_segment(data: &[u8]) -> Result<SegmentPayload, WireError> {
    let mut r = Reader::new(data, SEGMENT_DATAGRAM_LEN)?;
    let segment_number = r.u32();
    let is_last = r.u8() != 0;
    let mut unit = [0.0; MAX_DOF];
    for slot in unit.iter_mut() {
        *slot = r.f32() as f64;
    }
    Ok(SegmentPayload {
        segment_number,
        is_last,
        unit,
        vi: r.f32() as f64,
        accel: r.f32() as f64,
        vmax: r.f32() as f64,
        vf: r.f32() as f64,
        distance: r.f32() as f64,
    })
}

pub fn encode_target(target: &MotionTarget) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(POSITION_TARGET_LEN);
    match *target {
        MotionTarget::Position { pos, vel, accel } => {
            datagram.push(MODE_POSITION);
            datagram.extend_from_slice(&pos.to_le_bytes());
            datagram.extend_from_slice(&vel.to_le_bytes());
            datagram.extend_from_slice(&accel.to_le_bytes());
        }
        MotionTarget::Velocity { vel, accel } => {
            datagram.push(MODE_VELOCITY);
            datagram.extend_from_slice(&vel.to_le_bytes());
            datagram.extend_from_slice(&accel.to_le_bytes());
        }
    }
    datagram
}

pub fn decode_target(data: &[u8]) -> Result<MotionTarget, WireError> {
    let mut r = Reader::new(data, 1)?;
    match r.u8() {
        MODE_POSITION => {
            let mut r = Reader::new(data, POSITION_TARGET_LEN)?;
            r.u8();
            Ok(MotionTarget::Position {
                pos: r.f32(),
                vel: r.f32(),
                accel: r.f32(),
            })
        }
        MODE_VELOCITY => {
            let mut r = Reader::new(data, VELOCITY_TARGET_LEN)?;
            r.u8();
            Ok(MotionTarget::Velocity {
                vel: r.f32(),
                accel: r.f32(),
            })
        }
        other => Err(WireError::UnknownMode(other)),
    }
}

/// Single-float payloads: set-position and current-scale settings.
pub fn encode_f32(value: f32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_f32(data: &[u8]) -> Result<f32, WireError> {
    Ok(Reader::new(data, 4)?.f32())
}

/// Motion-state query response: pos, vel, accel in steps.
pub fn encode_state(pos: f32, vel: f32, accel: f32) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(STATE_LEN);
    for value in [pos, vel, accel] {
        datagram.extend_from_slice(&value.to_le_bytes());
    }
    datagram
}

pub fn decode_state(data: &[u8]) -> Result<(f32, f32, f32), WireError> {
    let mut r = Reader::new(data, STATE_LEN)?;
    Ok((r.f32(), r.f32(), r.f32()))
}

pub fn encode_segment_complete(segment_number: u32) -> Vec<u8> {
    segment_number.to_le_bytes().to_vec()
}

pub fn decode_segment_complete(data: &[u8]) -> Result<u32, WireError> {
    Ok(Reader::new(data, 4)?.u32())
}
