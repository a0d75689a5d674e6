//! Loopback control socket for the local status UI and fleetctl

mod server;

pub use server::ControlServer;
