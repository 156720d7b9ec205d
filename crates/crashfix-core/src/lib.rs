pub mod approval;
pub mod build;
pub mod config;
pub mod deploy;
pub mod error;
pub mod git;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod store;
pub mod trigger;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{CrashfixError, Result};
