//! `kubeboot join`: flags, run context and the post-run summary.

use crate::cli::options::{self, get_flag, get_string, get_strings};
use crate::cli::route::{self, CommandEnv};
use crate::cluster::Collaborators;
use crate::config::{resolve_ignore_preflight_errors, KubebootConfig};
use crate::error::CommandError;
use crate::phases::init::kubeconfig::ADMIN_KUBECONFIG;
use crate::phases::join::join_phases;
use crate::phases::token::validate_certificate_key;
use crate::phases::{Console, HostData, JoinData};
use crate::workflow::Runner;
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Run context shared by every `join` phase.
pub struct JoinContext {
    cfg: KubebootConfig,
    init_cfg: Option<KubebootConfig>,
    ignore_preflight_errors: BTreeSet<String>,
    collaborators: Collaborators,
    console: Console,
    api_server_endpoint: String,
    tls_bootstrap_token: String,
    control_plane: bool,
    certificate_key: String,
}

impl JoinContext {
    pub fn new(
        env: &CommandEnv,
        matches: Option<&ArgMatches>,
        args: &[String],
    ) -> Result<Self, CommandError> {
        let mut cfg = env.load_config(matches)?;
        apply_flags(&mut cfg, matches, args);

        let mut problems = match cfg.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        };
        if cfg.join.api_server_endpoint.is_empty() {
            problems.push("join: an API server endpoint to join is required".to_string());
        }
        if cfg.join.bootstrap_token().is_empty() {
            problems.push(format!(
                "join: a bootstrap token is required, use --{} or --{}",
                options::TOKEN_STR,
                options::TLS_BOOTSTRAP_TOKEN
            ));
        }
        let ignore = resolve_ignore_preflight_errors(
            &cfg.node.ignore_preflight_errors,
            &get_strings(matches, options::IGNORE_PREFLIGHT_ERRORS),
        )
        .unwrap_or_else(|e| {
            problems.push(format!("ignore-preflight-errors: {}", e));
            BTreeSet::new()
        });
        let certificate_key = get_string(matches, options::CERTIFICATE_KEY).unwrap_or_default();
        if !certificate_key.is_empty() {
            if !cfg.join.control_plane {
                problems.push(format!(
                    "join: --{} can only be used together with --{}",
                    options::CERTIFICATE_KEY,
                    options::CONTROL_PLANE
                ));
            }
            if let Err(e) = validate_certificate_key(&certificate_key) {
                problems.push(format!("certificate key: {}", e));
            }
        }
        if !problems.is_empty() {
            return Err(CommandError::Validation(problems));
        }

        cfg.node.name = route::resolve_node_name(&cfg.node.name)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;
        cfg.node.cri_socket = env
            .resolve_cri_socket(&cfg.node.cri_socket)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;

        Ok(Self {
            init_cfg: None,
            ignore_preflight_errors: ignore,
            collaborators: env.collaborators.clone(),
            console: env.console.clone(),
            api_server_endpoint: cfg.join.api_server_endpoint.clone(),
            tls_bootstrap_token: cfg.join.bootstrap_token().to_string(),
            control_plane: cfg.join.control_plane,
            certificate_key,
            cfg,
        })
    }

    /// Cluster configuration with this node's own settings laid over it.
    fn fetch_init_cfg(&self) -> anyhow::Result<KubebootConfig> {
        self.console
            .println("[preflight] Reading configuration from the cluster...")?;
        let raw = self
            .collaborators
            .api
            .fetch_config()
            .context("unable to fetch the kubeboot configuration from the cluster")?;
        let mut init_cfg = match raw {
            Some(raw) => toml::from_str::<KubebootConfig>(&raw)
                .context("unable to decode the cluster configuration")?,
            None => {
                warn!("no cluster configuration found, using the local configuration");
                self.cfg.clone()
            }
        };
        init_cfg.node = self.cfg.node.clone();
        init_cfg.paths = self.cfg.paths.clone();
        if self.control_plane {
            init_cfg.api_endpoint = self.cfg.api_endpoint.clone();
        }
        Ok(init_cfg)
    }
}

/// Command-line values take precedence over every configuration source.
fn apply_flags(cfg: &mut KubebootConfig, matches: Option<&ArgMatches>, args: &[String]) {
    options::apply_node_flags(cfg, matches);
    options::apply_api_endpoint_flags(cfg, matches);
    if let Some(endpoint) =
        get_string(matches, options::API_SERVER_ENDPOINT).or_else(|| args.first().cloned())
    {
        cfg.join.api_server_endpoint = endpoint;
    }
    if let Some(token) = get_string(matches, options::TOKEN_STR) {
        cfg.join.token = token;
    }
    if let Some(token) = get_string(matches, options::TLS_BOOTSTRAP_TOKEN) {
        cfg.join.tls_bootstrap_token = token;
    }
    if get_flag(matches, options::CONTROL_PLANE) {
        cfg.join.control_plane = true;
    }
}

impl HostData for JoinContext {
    fn node_name(&self) -> &str {
        &self.cfg.node.name
    }

    fn cri_socket(&self) -> &str {
        &self.cfg.node.cri_socket
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

impl JoinData for JoinContext {
    fn cfg(&self) -> &KubebootConfig {
        &self.cfg
    }

    fn init_cfg(&mut self) -> anyhow::Result<&KubebootConfig> {
        if self.init_cfg.is_none() {
            let fetched = self.fetch_init_cfg()?;
            debug!(
                kubernetes_version = %fetched.cluster.kubernetes_version,
                "cluster configuration retrieved"
            );
            self.init_cfg = Some(fetched);
        }
        self.init_cfg
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("cluster configuration unavailable"))
    }

    fn api_server_endpoint(&self) -> &str {
        &self.api_server_endpoint
    }

    fn tls_bootstrap_token(&self) -> &str {
        &self.tls_bootstrap_token
    }

    fn control_plane(&self) -> bool {
        self.control_plane
    }

    fn certificate_key(&self) -> &str {
        &self.certificate_key
    }

    fn cert_dir(&self) -> PathBuf {
        self.cfg.cluster.certificates_dir.clone()
    }

    fn kubeconfig_dir(&self) -> PathBuf {
        self.cfg.paths.kubernetes_dir.clone()
    }

    fn kubelet_dir(&self) -> PathBuf {
        self.cfg.paths.kubelet_dir.clone()
    }
}

fn api_server_endpoint_arg() -> Arg {
    Arg::new(options::API_SERVER_ENDPOINT)
        .value_name("API_SERVER_ENDPOINT")
        .help("API server endpoint to join, host:port")
}

pub fn command() -> Command {
    Command::new("join")
        .about("Run this on any machine you wish to join an existing cluster")
        .long_about(
            "When joining a kubeboot initialized cluster, we need to establish bidirectional trust. \
             The node presents a bootstrap token to the API server and, once trusted, the kubelet \
             performs the TLS bootstrap. If --control-plane is given, the node additionally gets \
             the control-plane certificates and a local etcd member.",
        )
        .arg(api_server_endpoint_arg())
        .arg(options::node_name_flag())
        .arg(options::cri_socket_flag())
        .arg(options::advertise_address_flag())
        .arg(options::bind_port_flag())
        .arg(options::certificate_key_flag())
        .arg(options::bool_flag(
            options::CONTROL_PLANE,
            "Create a new control plane instance on this node",
        ))
        .arg(options::token_flag(
            "Use this token for both discovery-token and tls-bootstrap-token when those values are not provided.",
        ))
        .arg(options::string_flag(
            options::TLS_BOOTSTRAP_TOKEN,
            "TOKEN",
            "Specify the token used to temporarily authenticate with the Kubernetes Control Plane while joining the node.",
        ))
        .arg(options::ignore_preflight_errors_flag())
}

pub fn new_runner(env: &CommandEnv) -> Runner<JoinContext> {
    let mut runner = Runner::new();
    for phase in join_phases() {
        runner.append_phase(phase);
    }
    let env = env.clone();
    runner.set_data_initializer(move |matches, args| Ok(JoinContext::new(&env, matches, args)?));
    runner
}

pub fn execute(
    runner: &mut Runner<JoinContext>,
    matches: &ArgMatches,
    env: &CommandEnv,
) -> Result<(), CommandError> {
    if !route::dispatch(runner, matches, &env.console)? {
        return Ok(());
    }

    let config_skips = runner.init_data(&[])?.cfg.join.skip_phases.clone();
    if runner.options.skip_phases.is_empty() && !config_skips.is_empty() {
        debug!(skip_phases = ?config_skips, "skipping phases from the configuration");
        runner.options.skip_phases = config_skips;
    }

    runner.run(&[])?;

    let data = runner
        .take_data()
        .ok_or_else(|| CommandError::Config("join run data missing after run".to_string()))?;
    data.console.println(join_done_message(&data))?;
    Ok(())
}

fn join_done_message(data: &JoinContext) -> String {
    if !data.control_plane {
        return "\nThis node has joined the cluster:\n\
                * Certificate signing request was sent to apiserver and a response was received.\n\
                * The Kubelet was informed of the new secure connection details.\n\n\
                Run 'kubectl get nodes' on the control-plane to see this node join the cluster.\n"
            .to_string();
    }

    let external_etcd = data
        .init_cfg
        .as_ref()
        .unwrap_or(&data.cfg)
        .cluster
        .etcd
        .is_external();
    let etcd_message = if external_etcd {
        ""
    } else {
        "* A new etcd member was added to the local/stacked etcd cluster.\n"
    };
    let kubeconfig = data.kubeconfig_dir().join(ADMIN_KUBECONFIG);

    format!(
        "\nThis node has joined the cluster and a new control plane instance was created:\n\n\
         * Certificate signing request was sent to apiserver and approval was received.\n\
         * The Kubelet was informed of the new secure connection details.\n\
         * Control plane label and taint were applied to the new node.\n\
         * The Kubernetes control plane instances scaled up.\n\
         {etcd}\n\
         To start administering your cluster from this node, you need to run the following as a regular user:\n\n\
         \tmkdir -p $HOME/.kube\n\
         \tsudo cp -i {kubeconfig} $HOME/.kube/config\n\
         \tsudo chown $(id -u):$(id -g) $HOME/.kube/config\n\n\
         Run 'kubectl get nodes' to see this node join the cluster.\n",
        etcd = etcd_message,
        kubeconfig = kubeconfig.display()
    )
}
