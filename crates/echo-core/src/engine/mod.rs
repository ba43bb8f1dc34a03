pub mod executor;
pub mod orchestrator;
pub mod progress;
