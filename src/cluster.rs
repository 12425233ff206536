//! Cluster collaborators
//!
//! Interfaces to everything the phases act upon but do not implement:
//! certificates, etcd membership, the kubelet service, the cluster API and
//! the container runtime. `host` holds implementations that drive local
//! tools, `dryrun` a recording stand-in used for the remote side and tests.

use anyhow::Result;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

pub mod dryrun;
pub mod host;

pub use dryrun::DryRunCluster;

/// Default CRI socket when no runtime could be detected.
pub const DEFAULT_CRI_SOCKET: &str = "/var/run/dockershim.sock";
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";
pub const CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";
pub const CRIO_SOCKET: &str = "/var/run/crio/crio.sock";

/// Leaf certificate signed by a CA in the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    /// File stem: `<base_name>.crt` / `<base_name>.key`
    pub base_name: String,
    pub common_name: String,
    pub organization: Vec<String>,
    /// Subject alternative names, DNS names and IPs alike
    pub sans: Vec<String>,
    /// File stem of the signing CA
    pub ca_base_name: String,
}

/// Client kubeconfig for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigRequest {
    pub file_name: String,
    pub client_name: String,
    pub organization: Vec<String>,
    /// API server URL, `https://host:port`
    pub server: String,
}

pub trait CertificateAuthority {
    fn create_ca(&self, cert_dir: &Path, base_name: &str, common_name: &str) -> Result<()>;
    fn create_signed_cert(&self, cert_dir: &Path, request: &CertRequest) -> Result<()>;
    /// Writes `sa.key` and `sa.pub`.
    fn create_service_account_keys(&self, cert_dir: &Path) -> Result<()>;
    fn write_kubeconfig(
        &self,
        kubeconfig_dir: &Path,
        cert_dir: &Path,
        request: &KubeconfigRequest,
    ) -> Result<()>;
}

pub trait EtcdCluster {
    fn check_cluster_health(&self, endpoints: &[String]) -> Result<()>;
    /// Adds a member and returns the resulting member list.
    fn add_member(&self, name: &str, peer_url: &str) -> Result<Vec<String>>;
    /// Removes a member and returns the remaining member list.
    fn remove_member(&self, name: &str) -> Result<Vec<String>>;
}

pub trait KubeletService {
    fn stop(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
}

pub trait ClusterApi {
    fn wait_for_api_server(&self, timeout: Duration) -> Result<()>;
    /// Stores the serialized cluster configuration in the cluster.
    fn upload_config(&self, config_toml: &str) -> Result<()>;
    /// Configuration stored by a previous `upload_config`, if any.
    fn fetch_config(&self) -> Result<Option<String>>;
    fn upload_certs(&self, certificate_key: &str, cert_dir: &Path) -> Result<()>;
    fn mark_control_plane(&self, node: &str, labels: &[&str], taints: &[String]) -> Result<()>;
    fn node_ready(&self, name: &str) -> Result<bool>;
    fn create_bootstrap_token(&self, token: &str) -> Result<()>;
    fn remove_node_endpoint(&self, node: &str) -> Result<()>;
    fn annotate_cri_socket(&self, node: &str, cri_socket: &str) -> Result<()>;
}

pub trait RuntimeDetector {
    fn detect_cri_socket(&self) -> Result<String>;
}

/// Container runtime reached through `cri_socket`.
pub trait ContainerRuntime {
    fn list_kube_containers(&self, cri_socket: &str) -> Result<Vec<String>>;
    fn remove_containers(&self, cri_socket: &str, ids: &[String]) -> Result<()>;
    fn pull_image(&self, cri_socket: &str, image: &str) -> Result<()>;
    fn image_exists(&self, cri_socket: &str, image: &str) -> Result<bool>;
    /// Unmounts every mount point below `dir`.
    fn unmount_under(&self, dir: &Path) -> Result<()>;
}

/// The set of collaborators handed to every run context.
#[derive(Clone)]
pub struct Collaborators {
    pub certs: Rc<dyn CertificateAuthority>,
    pub etcd: Rc<dyn EtcdCluster>,
    pub kubelet: Rc<dyn KubeletService>,
    pub api: Rc<dyn ClusterApi>,
    pub runtime_detector: Rc<dyn RuntimeDetector>,
    pub runtime: Rc<dyn ContainerRuntime>,
}

impl Collaborators {
    /// Every collaborator records into `cluster`; nothing touches the host.
    pub fn recording(cluster: DryRunCluster) -> Self {
        let cluster = Rc::new(cluster);
        Self {
            certs: cluster.clone(),
            etcd: cluster.clone(),
            kubelet: cluster.clone(),
            api: cluster.clone(),
            runtime_detector: cluster.clone(),
            runtime: cluster,
        }
    }

    /// Host kubelet, runtime detection and container runtime; `remote`
    /// stands in for PKI, etcd and the cluster API.
    pub fn host(remote: DryRunCluster) -> Self {
        let remote = Rc::new(remote);
        Self {
            certs: remote.clone(),
            etcd: remote.clone(),
            kubelet: Rc::new(host::SystemdKubelet),
            api: remote,
            runtime_detector: Rc::new(host::SocketRuntimeDetector),
            runtime: Rc::new(host::CliContainerRuntime),
        }
    }
}
