//! `kubeboot reset`: flags, run context and the final cleanup.

use crate::cli::options::{self, get_flag, get_string, get_strings};
use crate::cli::route::{self, CommandEnv};
use crate::cluster::host::clean_dir;
use crate::cluster::Collaborators;
use crate::config::{resolve_ignore_preflight_errors, KubebootConfig, PathsConfig};
use crate::error::CommandError;
use crate::phases::init::kubeconfig::ADMIN_KUBECONFIG;
use crate::phases::reset::{display_list, reset_phases};
use crate::phases::{Console, HostData, ResetData};
use crate::workflow::Runner;
use anyhow::Context;
use clap::{ArgMatches, Command};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Run context shared by every `reset` phase.
pub struct ResetContext {
    /// Cluster configuration, when this node could still reach the cluster.
    cluster_cfg: Option<KubebootConfig>,
    paths: PathsConfig,
    node_name: String,
    cri_socket: String,
    cert_dir: PathBuf,
    force: bool,
    ignore_preflight_errors: BTreeSet<String>,
    collaborators: Collaborators,
    console: Console,
    dirs_to_clean: Vec<PathBuf>,
}

impl ResetContext {
    pub fn new(env: &CommandEnv, matches: Option<&ArgMatches>) -> Result<Self, CommandError> {
        let mut cfg = env.load_config(matches)?;
        options::apply_node_flags(&mut cfg, matches);

        let ignore = resolve_ignore_preflight_errors(
            &cfg.node.ignore_preflight_errors,
            &get_strings(matches, options::IGNORE_PREFLIGHT_ERRORS),
        )
        .map_err(|e| CommandError::Validation(vec![format!("ignore-preflight-errors: {}", e)]))?;

        let cluster_cfg = if cfg.paths.kubernetes_dir.join(ADMIN_KUBECONFIG).exists() {
            fetch_cluster_config(env)
        } else {
            debug!("no admin kubeconfig found, not reading the cluster configuration");
            None
        };

        let cert_dir = get_string(matches, options::CERTIFICATES_DIR)
            .map(PathBuf::from)
            .or_else(|| cluster_cfg.as_ref().map(|c| c.cluster.certificates_dir.clone()))
            .unwrap_or_else(|| cfg.cluster.certificates_dir.clone());

        let configured_socket = if cfg.node.cri_socket.is_empty() {
            cluster_cfg
                .as_ref()
                .map(|c| c.node.cri_socket.clone())
                .unwrap_or_default()
        } else {
            cfg.node.cri_socket.clone()
        };
        let cri_socket = env
            .resolve_cri_socket(&configured_socket)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;
        let node_name = route::resolve_node_name(&cfg.node.name)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;

        Ok(Self {
            cluster_cfg,
            paths: cfg.paths,
            node_name,
            cri_socket,
            cert_dir,
            force: get_flag(matches, options::FORCE_RESET),
            ignore_preflight_errors: ignore,
            collaborators: env.collaborators.clone(),
            console: env.console.clone(),
            dirs_to_clean: Vec::new(),
        })
    }
}

/// The reset goes on without a cluster configuration; failures are only
/// reported.
fn fetch_cluster_config(env: &CommandEnv) -> Option<KubebootConfig> {
    if let Err(e) = env
        .console
        .println("[reset] Reading configuration from the cluster...")
    {
        warn!(error = %e, "failed to write to the console");
    }
    let fetched = env
        .collaborators
        .api
        .fetch_config()
        .and_then(|raw| match raw {
            Some(raw) => toml::from_str::<KubebootConfig>(&raw)
                .map(Some)
                .context("unable to decode the cluster configuration"),
            None => Ok(None),
        });
    match fetched {
        Ok(Some(cfg)) => Some(cfg),
        Ok(None) => {
            warn!("no cluster configuration found, the etcd member will not be removed");
            None
        }
        Err(e) => {
            warn!(
                error = %format!("{:#}", e),
                "unable to fetch the kubeboot configuration from the cluster"
            );
            None
        }
    }
}

impl HostData for ResetContext {
    fn node_name(&self) -> &str {
        &self.node_name
    }

    fn cri_socket(&self) -> &str {
        &self.cri_socket
    }

    fn ignore_preflight_errors(&self) -> &BTreeSet<String> {
        &self.ignore_preflight_errors
    }

    fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn console(&self) -> &Console {
        &self.console
    }
}

impl ResetData for ResetContext {
    fn cfg(&self) -> Option<&KubebootConfig> {
        self.cluster_cfg.as_ref()
    }

    fn force_reset(&self) -> bool {
        self.force
    }

    fn cert_dir(&self) -> PathBuf {
        self.cert_dir.clone()
    }

    fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    fn dirs_to_clean(&self) -> &[PathBuf] {
        &self.dirs_to_clean
    }

    fn add_dir_to_clean(&mut self, dir: PathBuf) {
        self.dirs_to_clean.push(dir);
    }
}

pub fn command() -> Command {
    Command::new("reset")
        .about("Performs a best effort revert of changes made to this host by 'kubeboot init' or 'kubeboot join'")
        .arg(options::cert_dir_flag())
        .arg(
            options::bool_flag(
                options::FORCE_RESET,
                "Reset the node without prompting for confirmation.",
            )
            .short('f'),
        )
        .arg(options::ignore_preflight_errors_flag())
        .arg(options::cri_socket_flag())
        .arg(options::node_name_flag())
}

pub fn new_runner(env: &CommandEnv) -> Runner<ResetContext> {
    let mut runner = Runner::new();
    for phase in reset_phases() {
        runner.append_phase(phase);
    }
    let env = env.clone();
    runner.set_data_initializer(move |matches, _| Ok(ResetContext::new(&env, matches)?));
    runner
}

pub fn execute(
    runner: &mut Runner<ResetContext>,
    matches: &ArgMatches,
    env: &CommandEnv,
) -> Result<(), CommandError> {
    if !route::dispatch(runner, matches, &env.console)? {
        return Ok(());
    }

    runner.run(&[])?;

    let data = runner
        .take_data()
        .ok_or_else(|| CommandError::Config("reset run data missing after run".to_string()))?;
    clean_stateful_dirs(&data)?;
    data.console.println(RESET_DONE_MESSAGE)?;
    Ok(())
}

fn clean_stateful_dirs(data: &ResetContext) -> Result<(), CommandError> {
    data.console.println(format!(
        "[reset] Deleting contents of stateful directories: {}",
        display_list(&data.dirs_to_clean)
    ))?;
    for dir in &data.dirs_to_clean {
        debug!(dir = %dir.display(), "cleaning directory");
        if let Err(e) = clean_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "failed to delete directory contents");
        }
    }
    Ok(())
}

const RESET_DONE_MESSAGE: &str = "
The reset process does not clean CNI configuration. To do so, you must remove /etc/cni/net.d

The reset process does not reset or clean up iptables rules or IPVS tables.
If you wish to reset iptables, you must do so manually by using the \"iptables\" command.

If your cluster was setup to utilize IPVS, run ipvsadm --clear (or similar)
to reset your system's IPVS tables.

The reset process does not clean your kubeconfig files and you must remove them manually.
Please, check the contents of the $HOME/.kube/config file.";
