//! # gameapd-common
//!
//! Shared building blocks for the GameAP daemon: the daemon-wide error
//! type and the command result code contract used by executors,
//! supervisors, commands and the task scheduler.

pub mod errors;
pub mod result;

pub use errors::{Error, Result, ResultExt};
pub use result::{ERROR_RESULT, SUCCESS_RESULT, UNKNOWN_RESULT};
