//! CLI domain: the `kubeboot` command tree, the run contexts of the
//! workflow commands and error presentation.
//! A single route table dispatches to the workflow runners.

pub mod init;
pub mod join;
pub mod options;
pub mod reset;
pub mod version;

mod output;
mod parse;
mod route;

pub use output::map_error;
pub use parse::Cli;
pub use route::{App, CommandEnv};
