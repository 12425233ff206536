//! Integration tests for the kubeboot workflows and their command tree

mod cli_projection;
mod config_layering;
mod init_workflow;
mod join_workflow;
mod reset_workflow;
mod runner_execution;
mod test_utils;
