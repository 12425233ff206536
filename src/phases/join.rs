//! The `join` workflow: add a worker or control-plane node to a cluster.

use crate::cli::options;
use crate::cluster::KubeconfigRequest;
use crate::config::KubebootConfig;
use crate::phases::init::certs::{ensure_cert, CERT_LIST};
use crate::phases::init::kubeconfig::{
    ensure_kubeconfig, BOOTSTRAP_KUBELET_KUBECONFIG, KUBECONFIG_LIST, KUBELET_KUBECONFIG,
};
use crate::phases::init::mark_control_plane;
use crate::phases::kubelet::{
    kubelet_flags, try_start_kubelet, try_stop_kubelet, write_config_file, write_env_file,
};
use crate::phases::preflight::{
    self, control_plane_images, FileAvailableCheck, ImagePullCheck, ETCD_PEER_PORT,
};
use crate::phases::{advertise_address, api_server_url, JoinData};
use crate::workflow::Phase;
use anyhow::{bail, Context, Result};
use clap::Arg;
use std::fs;
use std::io;
use tracing::{debug, warn};

/// Every `join` phase in execution order.
pub fn join_phases<D: JoinData + 'static>() -> Vec<Phase<D>> {
    vec![
        new_preflight_phase(),
        new_control_plane_prepare_phase(),
        new_check_etcd_phase(),
        new_kubelet_start_phase(),
        new_control_plane_join_phase(),
    ]
}

fn is_control_plane<D: JoinData>(data: &D) -> Result<bool> {
    Ok(data.control_plane())
}

/// Files a control-plane node shares with the rest of the control plane.
/// They must be copied over unless they are downloaded with a certificate key.
fn shared_certificate_files(cfg: &KubebootConfig) -> Vec<&'static str> {
    let mut files = vec![
        "ca.crt",
        "ca.key",
        "sa.key",
        "sa.pub",
        "front-proxy-ca.crt",
        "front-proxy-ca.key",
    ];
    if !cfg.cluster.etcd.is_external() {
        files.extend(["etcd/ca.crt", "etcd/ca.key"]);
    }
    files
}

fn check_ready_for_additional_control_plane<D: JoinData>(
    data: &D,
    init_cfg: &KubebootConfig,
) -> Result<()> {
    if init_cfg.cluster.control_plane_endpoint.trim().is_empty() {
        bail!(
            "unable to add a new control plane instance to a cluster that doesn't have a stable controlPlaneEndpoint address"
        );
    }
    if !data.certificate_key().is_empty() {
        return Ok(());
    }
    let cert_dir = data.cert_dir();
    let missing: Vec<&str> = shared_certificate_files(init_cfg)
        .into_iter()
        .filter(|file| !cert_dir.join(file).is_file())
        .collect();
    if !missing.is_empty() {
        bail!(
            "unable to add a new control plane instance: missing shared certificates in {} ({}); \
             copy them from an existing control-plane node or use --{}",
            cert_dir.display(),
            missing.join(", "),
            options::CERTIFICATE_KEY
        );
    }
    Ok(())
}

pub fn new_preflight_phase<D: JoinData + 'static>() -> Phase<D> {
    Phase::new("preflight [api-server-endpoint]")
        .short("Run join pre-flight checks")
        .long("Run pre-flight checks for kubeboot join.")
        .example(
            "# Run join pre-flight checks using a config file.\n\
             kubeboot join phase preflight --config kubeboot.toml",
        )
        .inherit_flags([
            options::CFG_PATH,
            options::IGNORE_PREFLIGHT_ERRORS,
            options::TLS_BOOTSTRAP_TOKEN,
            options::TOKEN_STR,
            options::CONTROL_PLANE,
            options::APISERVER_ADVERTISE_ADDRESS,
            options::APISERVER_BIND_PORT,
            options::NODE_CRI_SOCKET,
            options::NODE_NAME,
            options::CERTIFICATE_KEY,
        ])
        .run(|data: &mut D| {
            data.console().println("[preflight] Running pre-flight checks")?;
            let mut checks = preflight::node_checks(&data.cfg().paths.kubernetes_dir);
            for file in [KUBELET_KUBECONFIG, BOOTSTRAP_KUBELET_KUBECONFIG] {
                checks.push(Box::new(FileAvailableCheck {
                    path: data.kubeconfig_dir().join(file),
                }));
            }
            preflight::run_checks(&checks, data.console(), data.ignore_preflight_errors())?;

            let init_cfg = data.init_cfg()?.clone();
            if !data.control_plane() {
                return Ok(());
            }

            check_ready_for_additional_control_plane(&*data, &init_cfg)?;

            let console = data.console();
            console.println("[preflight] Running pre-flight checks before initializing the new control plane instance")?;
            let checks =
                preflight::control_plane_checks(&init_cfg, &data.cfg().paths.manifests_dir);
            preflight::run_checks(&checks, console, data.ignore_preflight_errors())?;

            console.println("[preflight] Pulling images required for setting up a Kubernetes cluster")?;
            console.println("[preflight] This might take a minute or two, depending on the speed of your internet connection")?;
            console.println("[preflight] You can also perform this action in beforehand using 'kubeboot config images pull'")?;
            let pull: Vec<Box<dyn preflight::Checker>> = vec![Box::new(ImagePullCheck {
                runtime: data.collaborators().runtime.clone(),
                cri_socket: data.cri_socket().to_string(),
                images: control_plane_images(&init_cfg),
            })];
            preflight::run_checks(&pull, console, data.ignore_preflight_errors())
        })
}

pub fn new_control_plane_prepare_phase<D: JoinData + 'static>() -> Phase<D> {
    let flags = [
        options::APISERVER_ADVERTISE_ADDRESS,
        options::APISERVER_BIND_PORT,
        options::CFG_PATH,
        options::CONTROL_PLANE,
        options::NODE_NAME,
        options::TOKEN_STR,
    ];
    Phase::new("control-plane-prepare")
        .short("Prepare the machine for serving a control plane")
        .example(
            "# Prepares the machine for serving a control plane\n\
             kubeboot join phase control-plane-prepare all",
        )
        .run_if(is_control_plane)
        .phases(vec![
            Phase::run_all_siblings("all [api-server-endpoint]")
                .short("Prepare the machine for serving a control plane")
                .inherit_flags(flags),
            Phase::new("certs [api-server-endpoint]")
                .short("Generate the certificates for the new control plane components")
                .inherit_flags(flags)
                .run_if(is_control_plane)
                .run(|data: &mut D| {
                    let init_cfg = data.init_cfg()?.clone();
                    let console = data.console();
                    let cert_dir = data.cert_dir();
                    console.println("[certs] Generating certificates for the new control plane instance")?;
                    console.println(format!(
                        "[certs] Using certificateDir folder {:?}",
                        cert_dir.display().to_string()
                    ))?;
                    let mut local = init_cfg.clone();
                    local.api_endpoint = data.cfg().api_endpoint.clone();
                    for spec in CERT_LIST.iter().filter(|spec| !spec.is_ca()) {
                        if local.cluster.etcd.is_external() && spec.is_etcd() {
                            continue;
                        }
                        ensure_cert(
                            console,
                            data.collaborators().certs.as_ref(),
                            spec,
                            &local,
                            data.node_name(),
                            &cert_dir,
                        )?;
                    }
                    Ok(())
                }),
            Phase::new("kubeconfig [api-server-endpoint]")
                .short("Generate the kubeconfig for the new control plane components")
                .inherit_flags(flags)
                .run_if(is_control_plane)
                .run(|data: &mut D| {
                    let init_cfg = data.init_cfg()?.clone();
                    let console = data.console();
                    console.println("[kubeconfig] Generating kubeconfig files")?;
                    console.println(format!(
                        "[kubeconfig] Using kubeconfig folder {:?}",
                        data.kubeconfig_dir().display().to_string()
                    ))?;
                    let server = api_server_url(&init_cfg);
                    for spec in KUBECONFIG_LIST.iter().filter(|s| s.file_name != KUBELET_KUBECONFIG) {
                        ensure_kubeconfig(
                            console,
                            data.collaborators().certs.as_ref(),
                            spec,
                            data.node_name(),
                            &server,
                            &data.kubeconfig_dir(),
                            &data.cert_dir(),
                        )?;
                    }
                    Ok(())
                }),
        ])
}

pub fn new_check_etcd_phase<D: JoinData + 'static>() -> Phase<D> {
    Phase::new("check-etcd")
        .hidden()
        .run_if(is_control_plane)
        .run(|data: &mut D| {
            let init_cfg = data.init_cfg()?.clone();
            if init_cfg.cluster.etcd.is_external() {
                data.console()
                    .println("[check-etcd] Skipping etcd check in external mode")?;
                return Ok(());
            }
            data.console()
                .println("[check-etcd] Checking that the etcd cluster is healthy")?;
            let host = init_cfg
                .cluster
                .control_plane_endpoint
                .rsplit_once(':')
                .map_or(init_cfg.cluster.control_plane_endpoint.as_str(), |(host, _)| host)
                .to_string();
            data.collaborators()
                .etcd
                .check_cluster_health(&[format!("https://{}:2379", host)])
        })
}

fn api_server_endpoint_arg() -> Arg {
    Arg::new(options::API_SERVER_ENDPOINT)
        .help("API server endpoint to join, host:port")
        .value_name("API_SERVER_ENDPOINT")
}

pub fn new_kubelet_start_phase<D: JoinData + 'static>() -> Phase<D> {
    Phase::new("kubelet-start [api-server-endpoint]")
        .short("Write kubelet settings, certificates and (re)start the kubelet")
        .long("Write a file with KubeletConfiguration and an environment file with node specific kubelet settings, and then (re)start kubelet.")
        .args(vec![api_server_endpoint_arg()])
        .inherit_flags([
            options::CFG_PATH,
            options::NODE_CRI_SOCKET,
            options::NODE_NAME,
            options::TLS_BOOTSTRAP_TOKEN,
            options::TOKEN_STR,
        ])
        .run(|data: &mut D| {
            let init_cfg = data.init_cfg()?.clone();
            let bootstrap_kubeconfig = data.kubeconfig_dir().join(BOOTSTRAP_KUBELET_KUBECONFIG);

            debug!(path = %bootstrap_kubeconfig.display(), "writing bootstrap kubelet config file");
            let request = KubeconfigRequest {
                file_name: BOOTSTRAP_KUBELET_KUBECONFIG.to_string(),
                client_name: "tls-bootstrap-token-user".to_string(),
                organization: Vec::new(),
                server: format!("https://{}", data.api_server_endpoint()),
            };
            data.collaborators()
                .certs
                .write_kubeconfig(&data.kubeconfig_dir(), &data.cert_dir(), &request)
                .context("couldn't save bootstrap-kubelet.conf to disk")?;

            let result = start_kubelet(&*data, &init_cfg);

            if let Err(e) = fs::remove_file(&bootstrap_kubeconfig) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %bootstrap_kubeconfig.display(), error = %e, "failed to remove bootstrap kubeconfig");
                }
            }
            result
        })
}

fn start_kubelet<D: JoinData>(data: &D, init_cfg: &KubebootConfig) -> Result<()> {
    let console = data.console();
    let collaborators = data.collaborators();
    let node_name = data.node_name();

    debug!(node = %node_name, "checking for an existing Node in the cluster with status Ready");
    let ready = collaborators
        .api
        .node_ready(node_name)
        .with_context(|| format!("cannot get Node {:?}", node_name))?;
    if ready {
        bail!(
            "a Node with name {:?} and status \"Ready\" already exists in the cluster. \
             You must delete the existing Node or change the name of this new joining Node",
            node_name
        );
    }

    debug!("stopping the kubelet");
    try_stop_kubelet(console, collaborators.kubelet.as_ref())?;

    write_config_file(console, &data.kubelet_dir(), init_cfg)?;
    let taints = if data.control_plane() {
        None
    } else {
        Some(data.cfg().node.taints.as_slice())
    };
    let flags = kubelet_flags(node_name, data.cri_socket(), taints);
    write_env_file(console, &data.kubelet_dir(), &flags)?;

    console.println("[kubelet-start] Starting the kubelet")?;
    try_start_kubelet(console, collaborators.kubelet.as_ref())?;
    console.println("[kubelet-start] Waiting for the kubelet to perform the TLS Bootstrap...")?;

    debug!("preserving the crisocket information for the node");
    collaborators
        .api
        .annotate_cri_socket(node_name, data.cri_socket())
        .context("error uploading crisocket")
}

pub fn new_control_plane_join_phase<D: JoinData + 'static>() -> Phase<D> {
    let flags = [
        options::APISERVER_ADVERTISE_ADDRESS,
        options::CFG_PATH,
        options::CONTROL_PLANE,
        options::NODE_NAME,
    ];
    Phase::new("control-plane-join")
        .short("Join a machine as a control plane instance")
        .example(
            "# Joins a machine as a control plane instance\n\
             kubeboot join phase control-plane-join all",
        )
        .run_if(is_control_plane)
        .phases(vec![
            Phase::run_all_siblings("all")
                .short("Join a machine as a control plane instance")
                .inherit_flags(flags),
            Phase::new("etcd")
                .short("Add a new local etcd member")
                .inherit_flags(flags)
                .run_if(is_control_plane)
                .run(|data: &mut D| {
                    let init_cfg = data.init_cfg()?.clone();
                    let console = data.console();
                    if init_cfg.cluster.etcd.is_external() {
                        console.println("[control-plane-join] Using external etcd - no local stacked instance added")?;
                        return Ok(());
                    }
                    let peer_url = format!(
                        "https://{}:{}",
                        advertise_address(data.cfg()),
                        ETCD_PEER_PORT
                    );
                    let members = data
                        .collaborators()
                        .etcd
                        .add_member(data.node_name(), &peer_url)
                        .context("error creating local etcd static pod manifest file")?;
                    debug!(?members, "etcd members after join");
                    console.println("[etcd] Announced new etcd member joining to the existing etcd cluster")?;
                    console.println("[etcd] Creating static Pod manifest for \"etcd\"")?;
                    console.println("[etcd] Waiting for the new etcd member to join the cluster. This can take up to 40s")?;
                    Ok(())
                }),
            Phase::new("mark-control-plane")
                .short("Mark a node as a control-plane")
                .inherit_flags([options::NODE_NAME, options::CONTROL_PLANE, options::CFG_PATH])
                .run_if(is_control_plane)
                .run(|data: &mut D| {
                    mark_control_plane(
                        data.console(),
                        data.collaborators().api.as_ref(),
                        data.node_name(),
                        &data.cfg().node.taints,
                    )
                }),
        ])
}
