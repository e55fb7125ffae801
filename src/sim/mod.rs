// src/sim/mod.rs - Simulated stepper controllers for the harness and tests
pub mod controller;
pub mod link;

pub use controller::{QueueHalt, SimController, SimMode};
pub use link::{SimFaults, SimLink};

use crate::actuator::{Actuator, ActuatorError, StepperProxy};
use crate::config::Config;
use std::sync::Arc;

/// One stepper proxy per configured axis, each talking to its own simulated
/// controller.
pub fn build_machine(config: &Config) -> Result<Vec<Arc<StepperProxy<SimLink>>>, ActuatorError> {
    let tick = config.simulator.tick();
    config
        .simulator
        .axes
        .iter()
        .enumerate()
        .map(|(i, axis)| {
            let link = SimLink::spawn(axis.name.clone(), i, axis.spu, tick);
            let proxy = StepperProxy::new(axis.name.clone(), link, &config.actuator);
            proxy.set_spu(axis.spu)?;
            proxy.set_abs_max_velocity(axis.abs_max_velocity)?;
            proxy.set_abs_max_accel(axis.abs_max_accel)?;
            tracing::debug!(
                "Simulated axis {} '{}': spu {}, vmax {:.3}, amax {:.3}",
                i,
                axis.name,
                axis.spu,
                proxy.abs_max_velocity(),
                axis.abs_max_accel
            );
            Ok(Arc::new(proxy))
        })
        .collect()
}
