#![doc = include_str!("../README.md")]

pub mod agent;
pub mod approval;
pub mod driver;
pub mod error;
pub mod message;
pub mod models;
pub mod run;
pub mod session;
pub mod thread;
pub mod tools;

pub use driver::{PollPolicy, RunDriver, RunOutcome};
pub use error::{RunLoopError, RunLoopResult, ToolError};
