//! Platform actuators
//!
//! The only way the agent changes the device: launching or restarting the
//! target application, checking what is foregrounded, rebooting, and
//! toggling the input-interception surface used by kiosk mode.

mod shell;
mod traits;

pub use shell::{ShellActuator, ShellActuatorConfig};
pub use traits::{Actuator, ActuatorError, LaunchMode};
