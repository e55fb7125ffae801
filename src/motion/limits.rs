// src/motion/limits.rs - Uniform per-axis limit scaling
//
// A move is described by a direction and a scalar velocity/acceleration. Each
// axis sees only its projection of those, so the tightest axis decides a single
// factor that shrinks the whole move without bending its direction.

/// Hard limits of one actuator, in machine units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    /// Absolute maximum velocity (units/s).
    pub abs_max_velocity: f64,
    /// Absolute maximum acceleration (units/s²).
    pub abs_max_accel: f64,
}

impl AxisLimits {
    pub fn new(abs_max_velocity: f64, abs_max_accel: f64) -> Self {
        Self {
            abs_max_velocity,
            abs_max_accel,
        }
    }
}

/// Computes the scale factor in `(0, 1]` that brings every axis within its limits.
///
/// Only the first `limits.len()` components of `unit` are considered; padded DOF
/// slots have no actuator behind them. The same factor covers velocity and
/// acceleration, so the more restrictive of the two wins.
pub fn scale_factor(unit: &[f64], velocity: f64, accel: f64, limits: &[AxisLimits]) -> f64 {
    let mut factor: f64 = 1.0;
    for (component, limit) in unit.iter().zip(limits) {
        let axis_velocity = (component * velocity).abs();
        let axis_accel = (component * accel).abs();
        if axis_velocity > limit.abs_max_velocity {
            factor = factor.min(limit.abs_max_velocity / axis_velocity);
        }
        if axis_accel > limit.abs_max_accel {
            factor = factor.min(limit.abs_max_accel / axis_accel);
        }
    }
    factor
}

/// A move after limit scaling, with per-axis magnitudes ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledMove {
    pub factor: f64,
    /// Scaled path velocity.
    pub velocity: f64,
    /// Scaled path acceleration.
    pub accel: f64,
    /// `|unit[i] * velocity|` for every actuator.
    pub axis_velocities: Vec<f64>,
    /// `|unit[i] * accel|` for every actuator.
    pub axis_accels: Vec<f64>,
}

impl ScaledMove {
    pub fn new(unit: &[f64], velocity: f64, accel: f64, limits: &[AxisLimits]) -> Self {
        let factor = scale_factor(unit, velocity, accel, limits);
        let velocity = velocity * factor;
        let accel = accel * factor;
        let (axis_velocities, axis_accels) = unit
            .iter()
            .take(limits.len())
            .map(|u| ((u * velocity).abs(), (u * accel).abs()))
            .unzip();
        if factor < 1.0 {
            tracing::debug!("Scaled move by {:.4} to {:.3} u/s, {:.3} u/s²", factor, velocity, accel);
        }
        Self {
            factor,
            velocity,
            accel,
            axis_velocities,
            axis_accels,
        }
    }
}
