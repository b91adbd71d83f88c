//! Command-line interface for furrow.
//!
//! Provides operational commands for enqueueing tasks, running workers,
//! inspecting queue state and managing the dead-letter queue.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
