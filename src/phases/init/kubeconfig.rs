//! `kubeconfig` phase: client configurations for the admin and the
//! control-plane components.

use crate::cli::options;
use crate::cluster::{CertificateAuthority, KubeconfigRequest};
use crate::phases::{api_server_url, Console, InitData};
use crate::workflow::Phase;
use anyhow::Result;
use std::path::Path;

pub const ADMIN_KUBECONFIG: &str = "admin.conf";
pub const KUBELET_KUBECONFIG: &str = "kubelet.conf";
pub const CONTROLLER_MANAGER_KUBECONFIG: &str = "controller-manager.conf";
pub const SCHEDULER_KUBECONFIG: &str = "scheduler.conf";
pub const BOOTSTRAP_KUBELET_KUBECONFIG: &str = "bootstrap-kubelet.conf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KubeconfigSpec {
    pub name: &'static str,
    pub file_name: &'static str,
    pub short: &'static str,
    /// `None` for the kubelet, whose identity is the node.
    pub client_name: Option<&'static str>,
    pub organization: &'static str,
}

pub const KUBECONFIG_LIST: [KubeconfigSpec; 4] = [
    KubeconfigSpec {
        name: "admin",
        file_name: ADMIN_KUBECONFIG,
        short: "Generate a kubeconfig file for the admin to use and for kubeboot itself",
        client_name: Some("kubernetes-admin"),
        organization: "system:masters",
    },
    KubeconfigSpec {
        name: "kubelet",
        file_name: KUBELET_KUBECONFIG,
        short: "Generate a kubeconfig file for the kubelet to use *only* for cluster bootstrapping purposes",
        client_name: None,
        organization: "system:nodes",
    },
    KubeconfigSpec {
        name: "controller-manager",
        file_name: CONTROLLER_MANAGER_KUBECONFIG,
        short: "Generate a kubeconfig file for the controller manager to use",
        client_name: Some("system:kube-controller-manager"),
        organization: "",
    },
    KubeconfigSpec {
        name: "scheduler",
        file_name: SCHEDULER_KUBECONFIG,
        short: "Generate a kubeconfig file for the scheduler to use",
        client_name: Some("system:kube-scheduler"),
        organization: "",
    },
];

/// Write the kubeconfig for `spec` unless the file already exists.
pub fn ensure_kubeconfig(
    console: &Console,
    certs: &dyn CertificateAuthority,
    spec: &KubeconfigSpec,
    node_name: &str,
    server: &str,
    kubeconfig_dir: &Path,
    cert_dir: &Path,
) -> Result<()> {
    let path = kubeconfig_dir.join(spec.file_name);
    if path.is_file() {
        console.println(format!(
            "[kubeconfig] Using existing kubeconfig file: {:?}",
            path.display().to_string()
        ))?;
        return Ok(());
    }

    console.println(format!(
        "[kubeconfig] Writing {:?} kubeconfig file",
        spec.file_name
    ))?;
    let client_name = match spec.client_name {
        Some(name) => name.to_string(),
        None => format!("system:node:{}", node_name),
    };
    let request = KubeconfigRequest {
        file_name: spec.file_name.to_string(),
        client_name,
        organization: if spec.organization.is_empty() {
            Vec::new()
        } else {
            vec![spec.organization.to_string()]
        },
        server: server.to_string(),
    };
    certs.write_kubeconfig(kubeconfig_dir, cert_dir, &request)
}

fn kubeconfig_sub_phase<D: InitData + 'static>(spec: KubeconfigSpec) -> Phase<D> {
    Phase::new(spec.name)
        .short(spec.short)
        .long(format!(
            "{}, and save it to {} file.",
            spec.short, spec.file_name
        ))
        .inherit_flags([
            options::APISERVER_ADVERTISE_ADDRESS,
            options::CONTROL_PLANE_ENDPOINT,
            options::APISERVER_BIND_PORT,
            options::CERTIFICATES_DIR,
            options::CFG_PATH,
            options::KUBECONFIG_DIR,
            options::NODE_NAME,
        ])
        .run(move |data: &mut D| {
            ensure_kubeconfig(
                data.console(),
                data.collaborators().certs.as_ref(),
                &spec,
                data.node_name(),
                &api_server_url(data.cfg()),
                &data.kubeconfig_dir(),
                &data.cert_dir(),
            )
        })
}

pub fn new_kubeconfig_phase<D: InitData + 'static>() -> Phase<D> {
    let mut sub_phases = vec![Phase::run_all_siblings("all")
        .short("Generate all kubeconfig files")
        .inherit_flags([
            options::APISERVER_ADVERTISE_ADDRESS,
            options::CONTROL_PLANE_ENDPOINT,
            options::APISERVER_BIND_PORT,
            options::CERTIFICATES_DIR,
            options::CFG_PATH,
            options::KUBECONFIG_DIR,
            options::NODE_NAME,
        ])];
    for spec in KUBECONFIG_LIST {
        sub_phases.push(kubeconfig_sub_phase(spec));
    }

    Phase::new("kubeconfig")
        .short("Generate all kubeconfig files necessary to establish the control plane and the admin kubeconfig file")
        .phases(sub_phases)
        .run(|data: &mut D| {
            data.console().println(format!(
                "[kubeconfig] Using kubeconfig folder {:?}",
                data.kubeconfig_dir().display().to_string()
            ))?;
            Ok(())
        })
}
