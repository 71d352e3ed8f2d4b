//! Command result code contract.
//!
//! Every command and executor in the daemon reports an integer exit code.
//! `-1` means the command never ran to completion (missing executable,
//! interruption), `0` means success, anything else is the child's own
//! failure code. A non-`UNKNOWN_RESULT` code always implies the process
//! ran to completion.

/// The command did not run to completion.
pub const UNKNOWN_RESULT: i32 = -1;

/// The command ran and succeeded.
pub const SUCCESS_RESULT: i32 = 0;

/// Generic failure code for commands that fail without a native code.
pub const ERROR_RESULT: i32 = 1;
