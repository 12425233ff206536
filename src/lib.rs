//! Kubeboot: composable cluster bootstrapping workflows
//!
//! `init`, `join` and `reset` are each a tree of named phases run by one
//! generic workflow runner. Every phase can also be invoked on its own
//! through `kubeboot <command> phase <name>`.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod phases;
pub mod workflow;
