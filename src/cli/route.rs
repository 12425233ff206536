//! CLI route: the root command, the per-invocation environment, and the
//! single route table dispatching to the workflow commands.

use crate::cli::parse::Cli;
use crate::cli::{init, join, options, reset, version};
use crate::cluster::{host, Collaborators, DryRunCluster};
use crate::config::{ConfigLoader, KubebootConfig};
use crate::error::CommandError;
use crate::phases::Console;
use crate::workflow::{Dispatch, Runner};
use clap::{ArgMatches, Command, CommandFactory};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, info};

/// Everything a command needs beyond its own flags.
#[derive(Clone)]
pub struct CommandEnv {
    pub collaborators: Collaborators,
    pub console: Console,
    /// Whether the global configuration file is read.
    pub include_global_config: bool,
    /// Replaces the process environment for `KUBEBOOT__*` lookups.
    pub env_overrides: Option<HashMap<String, String>>,
    /// Parent of the dry-run output directory.
    pub scratch_dir: PathBuf,
}

impl CommandEnv {
    /// The environment of the `kubeboot` binary.
    pub fn host() -> Self {
        Self {
            collaborators: Collaborators::host(DryRunCluster::new()),
            console: Console::stdio(),
            include_global_config: true,
            env_overrides: None,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Only defaults and `--config` are loaded; nothing is read from the
    /// user's home or the process environment.
    pub fn isolated(collaborators: Collaborators, console: Console, scratch_dir: PathBuf) -> Self {
        Self {
            collaborators,
            console,
            include_global_config: false,
            env_overrides: Some(HashMap::new()),
            scratch_dir,
        }
    }

    pub fn load_config(&self, matches: Option<&ArgMatches>) -> Result<KubebootConfig, CommandError> {
        let path = options::get_path(matches, options::CFG_PATH);
        let cfg = ConfigLoader::load_with(
            path.as_deref(),
            self.include_global_config,
            self.env_overrides.clone(),
        )?;
        Ok(cfg)
    }

    /// `configured`, or the socket found on the host.
    pub fn resolve_cri_socket(&self, configured: &str) -> anyhow::Result<String> {
        if !configured.is_empty() {
            debug!(cri_socket = configured, "using specified CRI socket");
            return Ok(configured.to_string());
        }
        let detected = self.collaborators.runtime_detector.detect_cri_socket()?;
        debug!(cri_socket = %detected, "detected CRI socket");
        Ok(detected)
    }
}

/// `configured`, or the host name.
pub(crate) fn resolve_node_name(configured: &str) -> anyhow::Result<String> {
    if configured.is_empty() {
        host::hostname()
    } else {
        Ok(configured.to_string())
    }
}

/// Hand a workflow invocation to its runner. `true` when the caller should
/// run the whole workflow itself.
pub(crate) fn dispatch<D>(
    runner: &mut Runner<D>,
    matches: &ArgMatches,
    console: &Console,
) -> Result<bool, CommandError> {
    match runner.dispatch(matches)? {
        Dispatch::Workflow => Ok(true),
        Dispatch::Phase(phase) => {
            info!(phase = %phase, "phase invocation completed");
            Ok(false)
        }
        Dispatch::Help(text) => {
            console.println(text)?;
            Ok(false)
        }
    }
}

/// The `kubeboot` command with one runner per workflow. One `App` serves
/// one invocation.
pub struct App {
    env: CommandEnv,
    init: Runner<init::InitContext>,
    join: Runner<join::JoinContext>,
    reset: Runner<reset::ResetContext>,
    command: Command,
}

impl App {
    pub fn new(env: CommandEnv) -> Self {
        let mut init = init::new_runner(&env);
        let mut join = join::new_runner(&env);
        let mut reset = reset::new_runner(&env);
        let command = Cli::command()
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommand(init.bind_to_command(init::command()))
            .subcommand(join.bind_to_command(join::command()))
            .subcommand(reset.bind_to_command(reset::command()))
            .subcommand(version::command());
        Self {
            env,
            init,
            join,
            reset,
            command,
        }
    }

    /// The full command tree, including the generated `phase` sub-commands.
    pub fn command(&self) -> Command {
        self.command.clone()
    }

    /// Execute already parsed matches of [`App::command`].
    pub fn execute(mut self, matches: &ArgMatches) -> Result<(), CommandError> {
        match matches.subcommand() {
            Some(("init", sub)) => init::execute(&mut self.init, sub, &self.env),
            Some(("join", sub)) => join::execute(&mut self.join, sub, &self.env),
            Some(("reset", sub)) => reset::execute(&mut self.reset, sub, &self.env),
            Some(("version", sub)) => version::execute(sub, &self.env.console),
            Some((name, _)) => Err(CommandError::Config(format!("unknown command {:?}", name))),
            None => Err(CommandError::Config("no command given".to_string())),
        }
    }

    /// Parse `argv` and execute it.
    pub fn run<I, T>(self, argv: I) -> Result<(), CommandError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command.clone().try_get_matches_from(argv)?;
        self.execute(&matches)
    }
}
