//! Workflow Phase Runner
//!
//! Generic engine sequencing a tree of named phases into a workflow. Phases
//! are flattened in pre-order, filtered by the runner options, and executed
//! one after the other against a single lazily built run data value. The
//! same tree is projected onto the command line as `<cmd> phase <name>`
//! sub-commands.

pub mod command;
pub mod data;
pub mod node;
pub mod phase;
pub mod run_flags;
pub mod runner;

pub use command::{Dispatch, PHASE_COMMAND, SKIP_PHASES_FLAG};
pub use data::{DataInitializer, RunDataProvider};
pub use node::{clean_name, flatten, PhaseNode, PHASE_SEPARATOR};
pub use phase::{Phase, PhaseAction, PhaseCondition};
pub use run_flags::{compute_run_flags, RunFlags};
pub use runner::{PhaseOutcome, Runner, RunnerOptions, SkipReason};
