//! Command reconciliation for the device agent
//!
//! This module handles:
//! - Polling the command store for pending commands, one task per kind
//! - Draining duplicate commands and verifying acknowledgments
//! - Applying each kind's effect at most once per cooldown window
//! - Manual restart requests that bypass the cooldown once

mod engine;
mod policy;
mod state;

pub use engine::KindPoller;
pub use policy::KindPolicy;
