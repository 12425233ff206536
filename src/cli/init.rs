//! `kubeboot init`: flags, run context and the post-run summary.

use crate::cli::options::{self, get_flag, get_string, get_strings};
use crate::cli::route::{self, CommandEnv};
use crate::cluster::Collaborators;
use crate::config::{resolve_ignore_preflight_errors, KubebootConfig};
use crate::error::CommandError;
use crate::phases::init::init_phases;
use crate::phases::init::kubeconfig::ADMIN_KUBECONFIG;
use crate::phases::token::{generate_token, validate_certificate_key, validate_token};
use crate::phases::{api_server_address, Console, HostData, InitData};
use crate::workflow::Runner;
use clap::{Arg, ArgMatches, Command};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Run context shared by every `init` phase.
pub struct InitContext {
    cfg: KubebootConfig,
    ignore_preflight_errors: BTreeSet<String>,
    collaborators: Collaborators,
    console: Console,
    dry_run: bool,
    dry_run_dir: Option<PathBuf>,
    kubeconfig_dir: PathBuf,
    upload_certs: bool,
    certificate_key: String,
    skip_certificate_key_print: bool,
    skip_token_print: bool,
    tokens: Vec<String>,
}

impl InitContext {
    /// Build the context from the loaded configuration and the flags of the
    /// invoking command.
    pub fn new(env: &CommandEnv, matches: Option<&ArgMatches>) -> Result<Self, CommandError> {
        let mut cfg = env.load_config(matches)?;
        apply_flags(&mut cfg, matches);

        let mut problems = match cfg.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        };
        let ignore = resolve_ignore_preflight_errors(
            &cfg.node.ignore_preflight_errors,
            &get_strings(matches, options::IGNORE_PREFLIGHT_ERRORS),
        )
        .unwrap_or_else(|e| {
            problems.push(format!("ignore-preflight-errors: {}", e));
            BTreeSet::new()
        });
        for token in &cfg.init.bootstrap_tokens {
            if let Err(e) = validate_token(token) {
                problems.push(format!("bootstrap token: {}", e));
            }
        }
        if !cfg.init.certificate_key.is_empty() {
            if let Err(e) = validate_certificate_key(&cfg.init.certificate_key) {
                problems.push(format!("certificate key: {}", e));
            }
        }
        if !problems.is_empty() {
            return Err(CommandError::Validation(problems));
        }
        // Keep the resolved set in the configuration uploaded to the cluster.
        cfg.node.ignore_preflight_errors = ignore.iter().cloned().collect();

        cfg.node.name = route::resolve_node_name(&cfg.node.name)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;
        cfg.node.cri_socket = env
            .resolve_cri_socket(&cfg.node.cri_socket)
            .map_err(|e| CommandError::Config(format!("{:#}", e)))?;

        let mut tokens = cfg.init.bootstrap_tokens.clone();
        if tokens.is_empty() {
            tokens.push(generate_token()?);
            cfg.init.bootstrap_tokens = tokens.clone();
        }

        let dry_run = get_flag(matches, options::DRY_RUN);
        let dry_run_dir = if dry_run {
            let dir = env
                .scratch_dir
                .join(format!("kubeboot-init-dryrun-{}", std::process::id()));
            fs::create_dir_all(&dir)?;
            debug!(dir = %dir.display(), "dry-run output directory created");
            Some(dir)
        } else {
            None
        };

        let kubeconfig_dir = get_string(matches, options::KUBECONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| cfg.paths.kubernetes_dir.clone());

        Ok(Self {
            upload_certs: cfg.init.upload_certs,
            certificate_key: cfg.init.certificate_key.clone(),
            skip_certificate_key_print: get_flag(matches, options::SKIP_CERTIFICATE_KEY_PRINT),
            skip_token_print: cfg.init.skip_token_print,
            ignore_preflight_errors: ignore,
            collaborators: env.collaborators.clone(),
            console: env.console.clone(),
            dry_run,
            dry_run_dir,
            kubeconfig_dir,
            tokens,
            cfg,
        })
    }

    fn output_dir(&self, dir: &Path) -> PathBuf {
        self.dry_run_dir.clone().unwrap_or_else(|| dir.to_path_buf())
    }
}

/// Command-line values take precedence over every configuration source.
fn apply_flags(cfg: &mut KubebootConfig, matches: Option<&ArgMatches>) {
    options::apply_node_flags(cfg, matches);
    options::apply_api_endpoint_flags(cfg, matches);
    if let Some(version) = get_string(matches, options::KUBERNETES_VERSION) {
        cfg.cluster.kubernetes_version = version;
    }
    if let Some(endpoint) = get_string(matches, options::CONTROL_PLANE_ENDPOINT) {
        cfg.cluster.control_plane_endpoint = endpoint;
    }
    let sans = get_strings(matches, options::APISERVER_CERT_SANS);
    if !sans.is_empty() {
        cfg.cluster.cert_sans = sans;
    }
    if let Some(domain) = get_string(matches, options::NETWORKING_DNS_DOMAIN) {
        cfg.cluster.dns_domain = domain;
    }
    if let Some(subnet) = get_string(matches, options::NETWORKING_SERVICE_SUBNET) {
        cfg.cluster.service_subnet = subnet;
    }
    if let Some(subnet) = get_string(matches, options::NETWORKING_POD_SUBNET) {
        cfg.cluster.pod_subnet = subnet;
    }
    if let Some(dir) = get_string(matches, options::CERTIFICATES_DIR) {
        cfg.cluster.certificates_dir = PathBuf::from(dir);
    }
    if get_flag(matches, options::UPLOAD_CERTS) {
        cfg.init.upload_certs = true;
    }
    if let Some(key) = get_string(matches, options::CERTIFICATE_KEY) {
        cfg.init.certificate_key = key;
    }
    if get_flag(matches, options::SKIP_TOKEN_PRINT) {
        cfg.init.skip_token_print = true;
    }
    if let Some(token) = get_string(matches, options::TOKEN_STR) {
        cfg.init.bootstrap_tokens = vec![token];
    }
}

impl HostData for InitContext {
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

impl InitData for InitContext {
    fn cfg(&self) -> &KubebootConfig {
        &self.cfg
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn cert_dir(&self) -> PathBuf {
        self.output_dir(&self.cfg.cluster.certificates_dir)
    }

    fn kubeconfig_dir(&self) -> PathBuf {
        self.output_dir(&self.kubeconfig_dir)
    }

    fn kubelet_dir(&self) -> PathBuf {
        self.output_dir(&self.cfg.paths.kubelet_dir)
    }

    fn manifest_dir(&self) -> PathBuf {
        self.output_dir(&self.cfg.paths.manifests_dir)
    }

    fn upload_certs(&self) -> bool {
        self.upload_certs
    }

    fn certificate_key(&self) -> &str {
        &self.certificate_key
    }

    fn set_certificate_key(&mut self, key: String) {
        self.certificate_key = key;
    }

    fn skip_certificate_key_print(&self) -> bool {
        self.skip_certificate_key_print
    }

    fn skip_token_print(&self) -> bool {
        self.skip_token_print
    }

    fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

pub fn command() -> Command {
    Command::new("init")
        .about("Run this command in order to set up the Kubernetes control plane")
        .arg(options::advertise_address_flag())
        .arg(options::bind_port_flag())
        .arg(options::string_flag(
            options::CONTROL_PLANE_ENDPOINT,
            "ENDPOINT",
            "Specify a stable IP address or DNS name for the control plane.",
        ))
        .arg(options::string_flag(
            options::KUBERNETES_VERSION,
            "VERSION",
            "Choose a specific Kubernetes version for the control plane.",
        ))
        .arg(options::list_flag(
            options::APISERVER_CERT_SANS,
            "SANS",
            "Optional extra Subject Alternative Names (SANs) to use for the API Server serving certificate. \
             Can be both IP addresses and DNS names.",
        ))
        .arg(options::string_flag(
            options::NETWORKING_DNS_DOMAIN,
            "DOMAIN",
            "Use alternative domain for services, e.g. \"myorg.internal\".",
        ))
        .arg(options::string_flag(
            options::NETWORKING_SERVICE_SUBNET,
            "CIDR",
            "Use alternative range of IP address for service VIPs.",
        ))
        .arg(options::string_flag(
            options::NETWORKING_POD_SUBNET,
            "CIDR",
            "Specify range of IP addresses for the pod network.",
        ))
        .arg(options::cert_dir_flag())
        .arg(options::node_name_flag())
        .arg(options::cri_socket_flag())
        .arg(options::ignore_preflight_errors_flag())
        .arg(options::bool_flag(
            options::DRY_RUN,
            "Don't apply any changes; just output what would be done.",
        ))
        .arg(options::bool_flag(
            options::UPLOAD_CERTS,
            "Upload control-plane certificates to the kubeboot-certs Secret.",
        ))
        .arg(options::certificate_key_flag())
        .arg(options::bool_flag(
            options::SKIP_CERTIFICATE_KEY_PRINT,
            "Don't print the key used to encrypt the control-plane certificates.",
        ))
        .arg(options::bool_flag(
            options::SKIP_TOKEN_PRINT,
            "Skip printing of the default bootstrap token generated by 'kubeboot init'.",
        ))
        .arg(options::token_flag(
            "The token to use for establishing bidirectional trust between nodes and control-plane nodes. \
             The format is [a-z0-9]{6}\\.[a-z0-9]{16} - e.g. abcdef.0123456789abcdef",
        ))
}

/// Flags only phase sub-commands can inherit.
fn additional_flags() -> Vec<Arg> {
    vec![options::string_flag(
        options::KUBECONFIG_DIR,
        "DIR",
        "The path where to save the kubeconfig file.",
    )]
}

pub fn new_runner(env: &CommandEnv) -> Runner<InitContext> {
    let mut runner = Runner::new();
    for phase in init_phases() {
        runner.append_phase(phase);
    }
    runner.set_additional_flags(additional_flags());
    let env = env.clone();
    runner.set_data_initializer(move |matches, _| Ok(InitContext::new(&env, matches)?));
    runner
}

pub fn execute(
    runner: &mut Runner<InitContext>,
    matches: &ArgMatches,
    env: &CommandEnv,
) -> Result<(), CommandError> {
    if !route::dispatch(runner, matches, &env.console)? {
        return Ok(());
    }

    let config_skips = {
        let data = runner.init_data(&[])?;
        data.console.println(format!(
            "[init] Using Kubernetes version: {}",
            data.cfg.cluster.kubernetes_version
        ))?;
        data.cfg.init.skip_phases.clone()
    };
    if runner.options.skip_phases.is_empty() && !config_skips.is_empty() {
        debug!(skip_phases = ?config_skips, "skipping phases from the configuration");
        runner.options.skip_phases = config_skips;
    }

    runner.run(&[])?;

    let data = runner
        .take_data()
        .ok_or_else(|| CommandError::Config("init run data missing after run".to_string()))?;
    print_summary(&data)
}

fn print_summary(data: &InitContext) -> Result<(), CommandError> {
    let console = &data.console;
    if data.dry_run {
        console.println("[dryrun] Finished dry-running successfully. Above are the resources that would be created")?;
        return Ok(());
    }
    console.println(init_done_message(data))?;
    Ok(())
}

/// Join command for one bootstrap token.
pub fn join_command(
    endpoint: &str,
    token: &str,
    certificate_key: Option<&str>,
    control_plane: bool,
) -> String {
    let mut command = format!("kubeboot join {} --token {}", endpoint, token);
    if control_plane {
        command.push_str(" \\\n\t--control-plane");
        if let Some(key) = certificate_key {
            command.push_str(&format!(" --certificate-key {}", key));
        }
    }
    command
}

fn init_done_message(data: &InitContext) -> String {
    let kubeconfig = data
        .kubeconfig_dir()
        .join(ADMIN_KUBECONFIG)
        .display()
        .to_string();
    let endpoint = api_server_address(&data.cfg);
    let withheld = "<value withheld>".to_string();

    let mut out = format!(
        "\nYour Kubernetes control-plane has initialized successfully!\n\n\
         To start using your cluster, you need to run the following as a regular user:\n\n\
         \x20 mkdir -p $HOME/.kube\n\
         \x20 sudo cp -i {kubeconfig} $HOME/.kube/config\n\
         \x20 sudo chown $(id -u):$(id -g) $HOME/.kube/config\n\n\
         Alternatively, if you are the root user, you can run:\n\n\
         \x20 export KUBECONFIG={kubeconfig}\n\n\
         You should now deploy a pod network to the cluster.\n\
         Run \"kubectl apply -f [podnetwork].yaml\" with one of the options listed at:\n\
         \x20 https://kubernetes.io/docs/concepts/cluster-administration/addons/\n\n",
        kubeconfig = kubeconfig
    );

    let tokens: Vec<&String> = data
        .tokens
        .iter()
        .map(|token| if data.skip_token_print { &withheld } else { token })
        .collect();
    let key = if data.skip_certificate_key_print {
        withheld.as_str()
    } else {
        data.certificate_key.as_str()
    };

    if !data.cfg.cluster.control_plane_endpoint.is_empty() {
        if data.upload_certs {
            out.push_str("You can now join any number of the control-plane node running the following command on each as root:\n\n");
            for token in &tokens {
                out.push_str(&format!("  {}\n\n", join_command(&endpoint, token, Some(key), true)));
            }
            out.push_str(
                "Please note that the certificate-key gives access to cluster sensitive data, keep it secret!\n\
                 As a safeguard, uploaded-certs will be deleted in two hours; If necessary, you can use\n\
                 \"kubeboot init phase upload-certs --upload-certs\" to reload certs afterward.\n\n",
            );
        } else {
            out.push_str(
                "You can now join any number of control-plane nodes by copying certificate authorities\n\
                 and service account keys on each node and then running the following as root:\n\n",
            );
            for token in &tokens {
                out.push_str(&format!("  {}\n\n", join_command(&endpoint, token, None, true)));
            }
        }
    }

    out.push_str("Then you can join any number of worker nodes by running the following on each as root:\n\n");
    for token in &tokens {
        out.push_str(&format!("{}\n", join_command(&endpoint, token, None, false)));
    }
    out
}
