// axl-rs: host-side coordination of networked stepper actuators

pub mod actuator;
pub mod config;
pub mod motion;
pub mod sim;

pub use actuator::{Actuator, ActuatorError, ActuatorState, Link, LinkError, MAX_DOF, StepperProxy};
pub use config::{Config, ConfigError, load_config};
pub use motion::{Coordinator, MotionError};
