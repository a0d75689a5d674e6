//! One-shot launch of the target application after system start

mod orchestrator;
mod probe;

pub use orchestrator::BootOrchestrator;
pub use probe::TcpProbe;
