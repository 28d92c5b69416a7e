pub mod collect;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod log_sanitize;
pub mod orchestrator;
pub mod planner;
pub mod provision;
pub mod stage;
pub mod util;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
