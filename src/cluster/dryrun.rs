//! Recording stand-in for every collaborator.
//!
//! Each call appends `"<operation> <detail>"` to an in-memory log and emits a
//! tracing event. Certificates and kubeconfigs are written as placeholder
//! files so that later phases find them on disk.

use crate::cluster::{
    CertRequest, CertificateAuthority, ClusterApi, ContainerRuntime, EtcdCluster,
    KubeconfigRequest, KubeletService, RuntimeDetector, DEFAULT_CRI_SOCKET,
};
use anyhow::{bail, Context, Result};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;

#[derive(Default)]
struct State {
    operations: Vec<String>,
    failures: BTreeSet<String>,
    uploaded_config: Option<String>,
    ready_nodes: BTreeSet<String>,
    etcd_members: Vec<String>,
    containers: Vec<String>,
    images: BTreeSet<String>,
    cri_socket: Option<String>,
}

/// Cheap to clone; clones share the same log.
#[derive(Clone, Default)]
pub struct DryRunCluster {
    state: Rc<RefCell<State>>,
}

impl DryRunCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail after being recorded.
    pub fn fail_on(self, operation: &str) -> Self {
        self.state.borrow_mut().failures.insert(operation.to_string());
        self
    }

    pub fn with_uploaded_config(self, config_toml: &str) -> Self {
        self.state.borrow_mut().uploaded_config = Some(config_toml.to_string());
        self
    }

    pub fn with_ready_node(self, name: &str) -> Self {
        self.state.borrow_mut().ready_nodes.insert(name.to_string());
        self
    }

    pub fn with_etcd_members(self, members: &[&str]) -> Self {
        self.state.borrow_mut().etcd_members = members.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_containers(self, ids: &[&str]) -> Self {
        self.state.borrow_mut().containers = ids.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_cri_socket(self, socket: &str) -> Self {
        self.state.borrow_mut().cri_socket = Some(socket.to_string());
        self
    }

    /// Recorded operations, oldest first.
    pub fn operations(&self) -> Vec<String> {
        self.state.borrow().operations.clone()
    }

    /// Names of the recorded operations, without their details.
    pub fn operation_names(&self) -> Vec<String> {
        self.state
            .borrow()
            .operations
            .iter()
            .map(|op| op.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn uploaded_config(&self) -> Option<String> {
        self.state.borrow().uploaded_config.clone()
    }

    pub fn etcd_members(&self) -> Vec<String> {
        self.state.borrow().etcd_members.clone()
    }

    pub fn containers(&self) -> Vec<String> {
        self.state.borrow().containers.clone()
    }

    fn record(&self, operation: &str, detail: impl AsRef<str>) -> Result<()> {
        let detail = detail.as_ref();
        info!(operation, detail, "dry-run operation");
        let mut state = self.state.borrow_mut();
        if detail.is_empty() {
            state.operations.push(operation.to_string());
        } else {
            state.operations.push(format!("{} {}", operation, detail));
        }
        if state.failures.contains(operation) {
            bail!("{} failed", operation);
        }
        Ok(())
    }
}

fn placeholder(kind: &str, subject: &str) -> String {
    format!(
        "-----BEGIN {kind}-----\n{}\n-----END {kind}-----\n",
        hex::encode(subject),
        kind = kind
    )
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn write_pair(cert_dir: &Path, base_name: &str, subject: &str) -> Result<()> {
    write_file(
        &cert_dir.join(format!("{}.crt", base_name)),
        &placeholder("CERTIFICATE", subject),
    )?;
    write_file(
        &cert_dir.join(format!("{}.key", base_name)),
        &placeholder("PRIVATE KEY", subject),
    )
}

impl CertificateAuthority for DryRunCluster {
    fn create_ca(&self, cert_dir: &Path, base_name: &str, common_name: &str) -> Result<()> {
        self.record("create-ca", base_name)?;
        write_pair(cert_dir, base_name, common_name)
    }

    fn create_signed_cert(&self, cert_dir: &Path, request: &CertRequest) -> Result<()> {
        self.record(
            "create-cert",
            format!("{} signed-by={}", request.base_name, request.ca_base_name),
        )?;
        write_pair(cert_dir, &request.base_name, &request.common_name)
    }

    fn create_service_account_keys(&self, cert_dir: &Path) -> Result<()> {
        self.record("create-sa-keys", "")?;
        write_file(&cert_dir.join("sa.key"), &placeholder("PRIVATE KEY", "sa"))?;
        write_file(&cert_dir.join("sa.pub"), &placeholder("PUBLIC KEY", "sa"))
    }

    fn write_kubeconfig(
        &self,
        kubeconfig_dir: &Path,
        _cert_dir: &Path,
        request: &KubeconfigRequest,
    ) -> Result<()> {
        self.record("write-kubeconfig", &request.file_name)?;
        write_file(
            &kubeconfig_dir.join(&request.file_name),
            &format!(
                "server: {}\nuser: {}\n",
                request.server, request.client_name
            ),
        )
    }
}

impl EtcdCluster for DryRunCluster {
    fn check_cluster_health(&self, endpoints: &[String]) -> Result<()> {
        self.record("etcd-health", endpoints.join(","))
    }

    fn add_member(&self, name: &str, peer_url: &str) -> Result<Vec<String>> {
        self.record("etcd-add-member", format!("{} {}", name, peer_url))?;
        let mut state = self.state.borrow_mut();
        if !state.etcd_members.iter().any(|m| m == name) {
            state.etcd_members.push(name.to_string());
        }
        Ok(state.etcd_members.clone())
    }

    fn remove_member(&self, name: &str) -> Result<Vec<String>> {
        self.record("etcd-remove-member", name)?;
        let mut state = self.state.borrow_mut();
        state.etcd_members.retain(|m| m != name);
        Ok(state.etcd_members.clone())
    }
}

impl KubeletService for DryRunCluster {
    fn stop(&self) -> Result<()> {
        self.record("kubelet-stop", "")
    }

    fn start(&self) -> Result<()> {
        self.record("kubelet-start", "")
    }

    fn restart(&self) -> Result<()> {
        self.record("kubelet-restart", "")
    }
}

impl ClusterApi for DryRunCluster {
    fn wait_for_api_server(&self, timeout: Duration) -> Result<()> {
        self.record("wait-api-server", format!("{}s", timeout.as_secs()))
    }

    fn upload_config(&self, config_toml: &str) -> Result<()> {
        self.record("upload-config", "")?;
        self.state.borrow_mut().uploaded_config = Some(config_toml.to_string());
        Ok(())
    }

    fn fetch_config(&self) -> Result<Option<String>> {
        self.record("fetch-config", "")?;
        Ok(self.state.borrow().uploaded_config.clone())
    }

    fn upload_certs(&self, _certificate_key: &str, cert_dir: &Path) -> Result<()> {
        self.record("upload-certs", cert_dir.display().to_string())
    }

    fn mark_control_plane(&self, node: &str, labels: &[&str], taints: &[String]) -> Result<()> {
        self.record(
            "mark-control-plane",
            format!("{} labels={} taints={}", node, labels.join(","), taints.join(",")),
        )
    }

    fn node_ready(&self, name: &str) -> Result<bool> {
        self.record("node-ready", name)?;
        Ok(self.state.borrow().ready_nodes.contains(name))
    }

    fn create_bootstrap_token(&self, token: &str) -> Result<()> {
        let id = token.split('.').next().unwrap_or_default();
        self.record("create-bootstrap-token", id)
    }

    fn remove_node_endpoint(&self, node: &str) -> Result<()> {
        self.record("remove-node-endpoint", node)
    }

    fn annotate_cri_socket(&self, node: &str, cri_socket: &str) -> Result<()> {
        self.record("annotate-cri-socket", format!("{} {}", node, cri_socket))
    }
}

impl RuntimeDetector for DryRunCluster {
    fn detect_cri_socket(&self) -> Result<String> {
        self.record("detect-cri-socket", "")?;
        Ok(self
            .state
            .borrow()
            .cri_socket
            .clone()
            .unwrap_or_else(|| DEFAULT_CRI_SOCKET.to_string()))
    }
}

impl ContainerRuntime for DryRunCluster {
    fn list_kube_containers(&self, cri_socket: &str) -> Result<Vec<String>> {
        self.record("list-containers", cri_socket)?;
        Ok(self.state.borrow().containers.clone())
    }

    fn remove_containers(&self, cri_socket: &str, ids: &[String]) -> Result<()> {
        self.record("remove-containers", format!("{} {}", cri_socket, ids.join(",")))?;
        self.state
            .borrow_mut()
            .containers
            .retain(|c| !ids.contains(c));
        Ok(())
    }

    fn pull_image(&self, _cri_socket: &str, image: &str) -> Result<()> {
        self.record("pull-image", image)?;
        self.state.borrow_mut().images.insert(image.to_string());
        Ok(())
    }

    fn image_exists(&self, _cri_socket: &str, image: &str) -> Result<bool> {
        Ok(self.state.borrow().images.contains(image))
    }

    fn unmount_under(&self, dir: &Path) -> Result<()> {
        self.record("unmount", dir.display().to_string())
    }
}
