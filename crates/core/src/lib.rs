// queuectl Core - Job lifecycle engine & ports
// NO infrastructure dependencies: storage and process spawning live in adapter crates

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use config::EngineConfig;
pub use error::{AppError, Result};
