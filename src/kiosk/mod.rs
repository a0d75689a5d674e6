//! Kiosk mode enforcement

mod enforcer;

pub use enforcer::KioskEnforcer;
