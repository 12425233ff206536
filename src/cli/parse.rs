//! CLI parse: global flags shared by every sub-command. The workflow
//! sub-commands are built with the builder API in their own modules since
//! their `phase` trees are generated at runtime.

use clap::Parser;
use std::path::PathBuf;

/// kubeboot - bootstrap a best-practice cluster
#[derive(Parser, Debug)]
#[command(name = "kubeboot")]
#[command(version)]
#[command(about = "kubeboot: easily bootstrap a secure Kubernetes cluster")]
#[command(
    long_about = "kubeboot: easily bootstrap a secure Kubernetes cluster\n\n\
    Example usage:\n\n\
    \x20   Create a two-machine cluster with one control-plane node\n\
    \x20   (which controls the cluster), and one worker node\n\
    \x20   (where your workloads, like Pods and Deployments run).\n\n\
    \x20   On the first machine:\n\
    \x20       control-plane# kubeboot init\n\n\
    \x20   On the second machine:\n\
    \x20       worker# kubeboot join <arguments-returned-from-init>"
)]
pub struct Cli {
    /// Path to a kubeboot configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}
