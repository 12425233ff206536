//! The `init` workflow: bootstrap the first control-plane node.

use crate::cli::options;
use crate::cluster::{ClusterApi, DEFAULT_CRI_SOCKET};
use crate::phases::kubelet::{
    kubelet_flags, try_start_kubelet, try_stop_kubelet, write_config_file, write_env_file,
};
use crate::phases::preflight::{self, control_plane_images, ImagePullCheck};
use crate::phases::token::{generate_certificate_key, token_id};
use crate::phases::{Console, InitData};
use crate::workflow::Phase;
use anyhow::{anyhow, Context, Result};
use std::time::Duration;

pub mod certs;
pub mod kubeconfig;

pub use certs::new_certs_phase;
pub use kubeconfig::new_kubeconfig_phase;

pub const LABEL_NODE_ROLE_OLD_CONTROL_PLANE: &str = "node-role.kubernetes.io/master";
pub const LABEL_NODE_ROLE_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";
pub const LABEL_EXCLUDE_FROM_EXTERNAL_LB: &str =
    "node.kubernetes.io/exclude-from-external-load-balancers";

/// Every `init` phase in execution order.
pub fn init_phases<D: InitData + 'static>() -> Vec<Phase<D>> {
    vec![
        new_preflight_phase(),
        new_certs_phase(),
        new_kubeconfig_phase(),
        new_kubelet_start_phase(),
        new_wait_control_plane_phase(),
        new_upload_config_phase(),
        new_upload_certs_phase(),
        new_mark_control_plane_phase(),
        new_bootstrap_token_phase(),
    ]
}

pub fn new_preflight_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("preflight")
        .short("Run pre-flight checks")
        .long("Run pre-flight checks for kubeboot init.")
        .example(
            "# Run pre-flight checks for kubeboot init using a config file.\n\
             kubeboot init phase preflight --config kubeboot.toml",
        )
        .inherit_flags([options::CFG_PATH, options::IGNORE_PREFLIGHT_ERRORS])
        .run(|data: &mut D| run_preflight(data))
}

fn run_preflight<D: InitData>(data: &D) -> Result<()> {
    let console = data.console();
    console.println("[preflight] Running pre-flight checks")?;

    let mut checks = preflight::node_checks(&data.cfg().paths.kubernetes_dir);
    checks.extend(preflight::control_plane_checks(data.cfg(), &data.manifest_dir()));
    preflight::run_checks(&checks, console, data.ignore_preflight_errors())?;

    if data.dry_run() {
        console.println("[preflight] Would pull the required images (like 'kubeboot config images pull')")?;
        return Ok(());
    }

    console.println("[preflight] Pulling images required for setting up a Kubernetes cluster")?;
    console.println("[preflight] This might take a minute or two, depending on the speed of your internet connection")?;
    console.println("[preflight] You can also perform this action in beforehand using 'kubeboot config images pull'")?;
    let pull: Vec<Box<dyn preflight::Checker>> = vec![Box::new(ImagePullCheck {
        runtime: data.collaborators().runtime.clone(),
        cri_socket: data.cri_socket().to_string(),
        images: control_plane_images(data.cfg()),
    })];
    preflight::run_checks(&pull, console, data.ignore_preflight_errors())
}

pub fn new_kubelet_start_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("kubelet-start")
        .short("Write kubelet settings and (re)start the kubelet")
        .long("Write a file with KubeletConfiguration and an environment file with node specific kubelet settings, and then (re)start kubelet.")
        .example(
            "# Writes a dynamic environment file with kubelet flags from a InitConfiguration file.\n\
             kubeboot init phase kubelet-start --config kubeboot.toml",
        )
        .inherit_flags([
            options::CFG_PATH,
            options::NODE_CRI_SOCKET,
            options::NODE_NAME,
            options::DRY_RUN,
        ])
        .run(|data: &mut D| {
            let console = data.console();
            let kubelet = data.collaborators().kubelet.as_ref();

            if !data.dry_run() {
                console.println("[kubelet-start] Stopping the kubelet")?;
                try_stop_kubelet(console, kubelet)?;
            }

            let flags = kubelet_flags(
                data.node_name(),
                data.cri_socket(),
                Some(&data.cfg().node.taints),
            );
            write_env_file(console, &data.kubelet_dir(), &flags)?;
            write_config_file(console, &data.kubelet_dir(), data.cfg())?;

            if !data.dry_run() {
                console.println("[kubelet-start] Starting the kubelet")?;
                try_start_kubelet(console, kubelet)?;
            }
            Ok(())
        })
}

fn kubelet_fail_message(err: &anyhow::Error, cri_socket: &str) -> String {
    let runtime_hint = if cri_socket == DEFAULT_CRI_SOCKET {
        "\tHere is one example how you may list all Kubernetes containers running in docker:\n\
         \t\t- 'docker ps -a | grep kube | grep -v pause'\n\
         \t\tOnce you have found the failing container, you can inspect its logs with:\n\
         \t\t- 'docker logs CONTAINERID'\n"
            .to_string()
    } else {
        format!(
            "\tHere is one example how you may list all Kubernetes containers running in cri-o/containerd using crictl:\n\
             \t\t- 'crictl --runtime-endpoint {socket} ps -a | grep kube | grep -v pause'\n\
             \t\tOnce you have found the failing container, you can inspect its logs with:\n\
             \t\t- 'crictl --runtime-endpoint {socket} logs CONTAINERID'\n",
            socket = cri_socket
        )
    };
    format!(
        "\n\tUnfortunately, an error has occurred:\n\
         \t\t{:#}\n\n\
         \tThis error is likely caused by:\n\
         \t\t- The kubelet is not running\n\
         \t\t- The kubelet is unhealthy due to a misconfiguration of the node in some way (required cgroups disabled)\n\n\
         \tIf you are on a systemd-powered system, you can try to troubleshoot the error with the following commands:\n\
         \t\t- 'systemctl status kubelet'\n\
         \t\t- 'journalctl -xeu kubelet'\n\n\
         \tAdditionally, a control plane component may have crashed or exited when started by the container runtime.\n\
         \tTo troubleshoot, list all containers using your preferred container runtimes CLI.\n\n\
         {}",
        err, runtime_hint
    )
}

pub fn new_wait_control_plane_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("wait-control-plane")
        .hidden()
        .run(|data: &mut D| {
            let console = data.console();
            if data.dry_run() {
                let dir = data.manifest_dir().display().to_string();
                console.println(format!(
                    "[dryrun] Wrote certificates, kubeconfig files and control plane manifests to the {:?} directory",
                    dir
                ))?;
                console.println("[dryrun] The certificates or kubeconfig files would not be printed due to their sensitive nature")?;
                console.println(format!(
                    "[dryrun] Please examine the {:?} directory for details about what would be written",
                    dir
                ))?;
            }

            let timeout = Duration::from_secs(data.cfg().cluster.api_server_timeout_secs);
            console.println(format!(
                "[wait-control-plane] Waiting for the kubelet to boot up the control plane as static Pods from directory {:?}. This can take up to {}s",
                data.manifest_dir().display().to_string(),
                timeout.as_secs()
            ))?;

            if let Err(e) = data.collaborators().api.wait_for_api_server(timeout) {
                console.println(kubelet_fail_message(&e, data.cri_socket()))?;
                return Err(anyhow!("couldn't initialize a Kubernetes cluster"));
            }
            Ok(())
        })
}

pub fn new_upload_config_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("upload-config")
        .short("Upload the kubeboot configuration to the cluster")
        .long("Upload the configuration used to initialize the cluster, so that joining nodes can retrieve it.")
        .inherit_flags([options::CFG_PATH])
        .run(|data: &mut D| {
            data.console().println(
                "[upload-config] Storing the configuration used in ConfigMap \"kubeboot-config\" in the \"kube-system\" Namespace",
            )?;
            let serialized = toml::to_string(data.cfg())
                .context("error serializing the cluster configuration")?;
            data.collaborators()
                .api
                .upload_config(&serialized)
                .context("error uploading the kubeboot configuration")
        })
}

pub fn new_upload_certs_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("upload-certs")
        .short("Upload certificates to kubeboot-certs")
        .long("Upload control plane certificates to the kubeboot-certs Secret")
        .inherit_flags([
            options::CFG_PATH,
            options::UPLOAD_CERTS,
            options::CERTIFICATE_KEY,
            options::SKIP_CERTIFICATE_KEY_PRINT,
        ])
        .run(|data: &mut D| {
            if !data.upload_certs() {
                data.console().println(format!(
                    "[upload-certs] Skipping phase. Please see --{}",
                    options::UPLOAD_CERTS
                ))?;
                return Ok(());
            }

            if data.certificate_key().is_empty() {
                let key = generate_certificate_key()
                    .context("error generating the certificate key")?;
                data.set_certificate_key(key);
            }

            data.collaborators()
                .api
                .upload_certs(data.certificate_key(), &data.cert_dir())
                .context("error uploading certs")?;

            if !data.skip_certificate_key_print() {
                data.console().println(format!(
                    "[upload-certs] Using certificate key:\n{}",
                    data.certificate_key()
                ))?;
            }
            Ok(())
        })
}

/// Label and taint `node` as a control-plane node.
pub fn mark_control_plane(
    console: &Console,
    api: &dyn ClusterApi,
    node: &str,
    taints: &[String],
) -> Result<()> {
    console.println(format!(
        "[mark-control-plane] Marking the node {} as control-plane by adding the labels: [{}(deprecated) {} {}]",
        node,
        LABEL_NODE_ROLE_OLD_CONTROL_PLANE,
        LABEL_NODE_ROLE_CONTROL_PLANE,
        LABEL_EXCLUDE_FROM_EXTERNAL_LB
    ))?;
    if !taints.is_empty() {
        console.println(format!(
            "[mark-control-plane] Marking the node {} as control-plane by adding the taints [{}]",
            node,
            taints.join(" ")
        ))?;
    }
    api.mark_control_plane(
        node,
        &[
            LABEL_NODE_ROLE_OLD_CONTROL_PLANE,
            LABEL_NODE_ROLE_CONTROL_PLANE,
            LABEL_EXCLUDE_FROM_EXTERNAL_LB,
        ],
        taints,
    )
}

pub fn new_mark_control_plane_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("mark-control-plane")
        .short("Mark a node as a control-plane")
        .example(
            "# Applies control-plane label and taint to the current node, functionally equivalent to what executed by kubeboot init.\n\
             kubeboot init phase mark-control-plane --config kubeboot.toml\n\n\
             # Applies control-plane label and taint to a specific node\n\
             kubeboot init phase mark-control-plane --node-name myNode",
        )
        .inherit_flags([options::NODE_NAME, options::CFG_PATH])
        .run(|data: &mut D| {
            if data.dry_run() {
                data.console()
                    .println("[dryrun] Would mark the node as control-plane")?;
            }
            mark_control_plane(
                data.console(),
                data.collaborators().api.as_ref(),
                data.node_name(),
                &data.cfg().node.taints,
            )
        })
}

pub fn new_bootstrap_token_phase<D: InitData + 'static>() -> Phase<D> {
    Phase::new("bootstrap-token")
        .alias("bootstraptoken")
        .short("Generates bootstrap tokens used to join a node to a cluster")
        .long(
            "Bootstrap tokens are used for establishing bidirectional trust between a node joining \
             the cluster and a control-plane node.",
        )
        .example(
            "# Make all the bootstrap token configurations and create an initial token, functionally\n\
             # equivalent to what generated by kubeboot init.\n\
             kubeboot init phase bootstrap-token",
        )
        .inherit_flags([options::CFG_PATH, options::SKIP_TOKEN_PRINT])
        .run(|data: &mut D| {
            let console = data.console();
            if !data.skip_token_print() {
                for token in data.tokens() {
                    console.println(format!("[bootstrap-token] Using token: {}", token))?;
                }
            }
            console.println("[bootstrap-token] Configuring bootstrap tokens, cluster-info ConfigMap, RBAC Roles")?;
            for token in data.tokens() {
                data.collaborators()
                    .api
                    .create_bootstrap_token(token)
                    .with_context(|| format!("error creating bootstrap token {}", token_id(token)))?;
            }
            console.println("[bootstrap-token] configured RBAC rules to allow Node Bootstrap tokens to get nodes")?;
            console.println("[bootstrap-token] configured RBAC rules to allow Node Bootstrap tokens to post CSRs in order for nodes to get long term certificate credentials")?;
            console.println("[bootstrap-token] configured RBAC rules to allow the csrapprover controller automatically approve CSRs from a Node Bootstrap Token")?;
            console.println("[bootstrap-token] Creating the \"cluster-info\" ConfigMap in the \"kube-public\" namespace")?;
            Ok(())
        })
}
