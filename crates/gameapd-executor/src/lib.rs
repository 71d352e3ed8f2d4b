//! # gameapd-executor
//!
//! Low-level child process execution for the GameAP daemon.
//!
//! This crate provides:
//! - Shell-style command line tokenization
//! - Process spawning with working directory and privilege dropping
//! - Merged stdout/stderr streaming into a sink
//! - The bounded, drainable output buffer shared by commands

pub mod exec;
pub mod output;

pub use exec::{run_child, spawn_command, Executor, ExecutorOptions, ProcessExecutor};
pub use output::{NullSink, OutputBuffer, OutputSink, OUTPUT_SIZE_LIMIT};
