// src/motion/vector.rs - Fixed-width vector helpers used by the coordinator
//
// All functions are pure. Callers are responsible for passing vectors of equal
// length; the coordinator checks dimensions before any of these run.

use crate::actuator::MAX_DOF;

/// Element-wise `a + b`.
pub fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| a + b).collect()
}

/// Element-wise `b - a`, i.e. the move from `a` to `b`.
pub fn delta(a: &[f64], b: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| b - a).collect()
}

/// Euclidean length of a single vector.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Euclidean distance between two points.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(a, b)| (b - a) * (b - a))
        .sum::<f64>()
        .sqrt()
}

/// Direction from `a` to `b` with unit length.
///
/// Returns `None` when the points coincide, since the direction is undefined.
pub fn unit_vector(a: &[f64], b: &[f64]) -> Option<Vec<f64>> {
    let dist = distance(a, b);
    if dist <= 0.0 || !dist.is_finite() {
        return None;
    }
    Some(a.iter().zip(b).map(|(a, b)| (b - a) / dist).collect())
}

/// `v` scaled to unit length, or `None` for the zero vector.
pub fn unit_of(v: &[f64]) -> Option<Vec<f64>> {
    let len = norm(v);
    if len <= 0.0 || !len.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / len).collect())
}

/// Copies `v` into a full-width DOF array, zero-filling unused axes.
///
/// Axes beyond `MAX_DOF` are dropped; the coordinator never builds vectors
/// that wide.
pub fn pad_to_dof(v: &[f64]) -> [f64; MAX_DOF] {
    let mut out = [0.0; MAX_DOF];
    for (slot, value) in out.iter_mut().zip(v) {
        *slot = *value;
    }
    out
}
