//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the collector and output layers to perform user tasks.

pub mod replay;
pub mod snapshots;

// Re-export main command functions
pub use replay::{execute_replay, load_script, run_script, validate_args, ReplayArgs, ReplayScript, ReplayStep};
pub use snapshots::{execute_list, execute_show};
