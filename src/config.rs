//! Configuration System
//!
//! Cluster and node configuration consumed by the init, join and reset
//! workflows. Values are layered: built-in defaults, the global config file,
//! an explicit `--config` file, then `KUBEBOOT__*` environment variables.
//! Command-line flags are applied on top by each command.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KubebootConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub api_endpoint: ApiEndpoint,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Settings only consulted by `init`
    #[serde(default)]
    pub init: InitConfig,

    /// Settings only consulted by `join`
    #[serde(default)]
    pub join: JoinConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster-wide settings shared by every control-plane node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,

    /// Stable address for the control plane; empty means the advertise address
    #[serde(default)]
    pub control_plane_endpoint: String,

    #[serde(default = "default_certificates_dir")]
    pub certificates_dir: PathBuf,

    #[serde(default = "default_service_subnet")]
    pub service_subnet: String,

    #[serde(default)]
    pub pod_subnet: String,

    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,

    /// Extra subject alternative names for the API server certificate
    #[serde(default)]
    pub cert_sans: Vec<String>,

    #[serde(default)]
    pub etcd: EtcdConfig,

    #[serde(default = "default_api_server_timeout_secs")]
    pub api_server_timeout_secs: u64,
}

/// Local (stacked) or external etcd. Both set is a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EtcdConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_data_dir: Option<PathBuf>,

    #[serde(default)]
    pub external_endpoints: Vec<String>,
}

impl EtcdConfig {
    pub fn is_external(&self) -> bool {
        !self.external_endpoints.is_empty()
    }

    /// Data directory of the local member, if etcd runs locally.
    pub fn data_dir(&self) -> Option<PathBuf> {
        if self.is_external() {
            return None;
        }
        Some(
            self.local_data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ETCD_DATA_DIR)),
        )
    }
}

/// Settings of the node the command runs on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Node name; empty means the host name
    #[serde(default)]
    pub name: String,

    /// CRI socket; empty means autodetect
    #[serde(default)]
    pub cri_socket: String,

    #[serde(default)]
    pub ignore_preflight_errors: Vec<String>,

    /// Taints registered with the node, `key[=value]:Effect`
    #[serde(default = "default_taints")]
    pub taints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEndpoint {
    #[serde(default)]
    pub advertise_address: String,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

/// Host directories the workflows read and write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_kubernetes_dir")]
    pub kubernetes_dir: PathBuf,

    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,

    #[serde(default = "default_kubelet_dir")]
    pub kubelet_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InitConfig {
    /// Phases skipped when `--skip-phases` is not given
    #[serde(default)]
    pub skip_phases: Vec<String>,

    #[serde(default)]
    pub bootstrap_tokens: Vec<String>,

    /// Hex encoded key for the uploaded certificates
    #[serde(default)]
    pub certificate_key: String,

    #[serde(default)]
    pub upload_certs: bool,

    #[serde(default)]
    pub skip_token_print: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinConfig {
    #[serde(default)]
    pub api_server_endpoint: String,

    #[serde(default)]
    pub token: String,

    /// Token used for TLS bootstrap; falls back to `token`
    #[serde(default)]
    pub tls_bootstrap_token: String,

    #[serde(default)]
    pub control_plane: bool,

    /// Phases skipped when `--skip-phases` is not given
    #[serde(default)]
    pub skip_phases: Vec<String>,
}

impl JoinConfig {
    pub fn bootstrap_token(&self) -> &str {
        if self.tls_bootstrap_token.is_empty() {
            &self.token
        } else {
            &self.tls_bootstrap_token
        }
    }
}

pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.22.6";
pub const DEFAULT_CERTIFICATES_DIR: &str = "/etc/kubernetes/pki";
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
pub const DEFAULT_ETCD_DATA_DIR: &str = "/var/lib/etcd";
pub const DEFAULT_API_SERVER_TIMEOUT_SECS: u64 = 240;
pub const DEFAULT_BIND_PORT: u16 = 6443;
pub const DEFAULT_KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const DEFAULT_MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";
pub const DEFAULT_KUBELET_DIR: &str = "/var/lib/kubelet";
pub const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/master:NoSchedule";

fn default_kubernetes_version() -> String {
    DEFAULT_KUBERNETES_VERSION.to_string()
}

fn default_certificates_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CERTIFICATES_DIR)
}

fn default_service_subnet() -> String {
    DEFAULT_SERVICE_SUBNET.to_string()
}

fn default_dns_domain() -> String {
    DEFAULT_DNS_DOMAIN.to_string()
}

fn default_api_server_timeout_secs() -> u64 {
    DEFAULT_API_SERVER_TIMEOUT_SECS
}

fn default_taints() -> Vec<String> {
    vec![CONTROL_PLANE_TAINT.to_string()]
}

fn default_bind_port() -> u16 {
    DEFAULT_BIND_PORT
}

fn default_kubernetes_dir() -> PathBuf {
    PathBuf::from(DEFAULT_KUBERNETES_DIR)
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFESTS_DIR)
}

fn default_kubelet_dir() -> PathBuf {
    PathBuf::from(DEFAULT_KUBELET_DIR)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubernetes_version: default_kubernetes_version(),
            control_plane_endpoint: String::new(),
            certificates_dir: default_certificates_dir(),
            service_subnet: default_service_subnet(),
            pod_subnet: String::new(),
            dns_domain: default_dns_domain(),
            cert_sans: Vec::new(),
            etcd: EtcdConfig::default(),
            api_server_timeout_secs: default_api_server_timeout_secs(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            cri_socket: String::new(),
            ignore_preflight_errors: Vec::new(),
            taints: default_taints(),
        }
    }
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self {
            advertise_address: String::new(),
            bind_port: default_bind_port(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            kubernetes_dir: default_kubernetes_dir(),
            manifests_dir: default_manifests_dir(),
            kubelet_dir: default_kubelet_dir(),
        }
    }
}

impl ClusterConfig {
    /// First and tenth address of the service subnet: the in-cluster API
    /// server address and the cluster DNS address.
    pub fn service_addresses(&self) -> Result<(Ipv4Addr, Ipv4Addr), String> {
        let (network, prefix) = parse_cidr(&self.service_subnet)?;
        if prefix > 28 {
            return Err(format!(
                "service subnet {} is too small, at least 16 addresses are needed",
                self.service_subnet
            ));
        }
        let base = u32::from(network);
        Ok((Ipv4Addr::from(base + 1), Ipv4Addr::from(base + 10)))
    }
}

fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    let (address, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("invalid CIDR {:?}: missing prefix length", cidr))?;
    let address: Ipv4Addr = address
        .parse()
        .map_err(|e| format!("invalid CIDR {:?}: {}", cidr, e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|e| format!("invalid CIDR {:?}: {}", cidr, e))?;
    if prefix > 32 {
        return Err(format!("invalid CIDR {:?}: prefix length above 32", cidr));
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Ok((Ipv4Addr::from(u32::from(address) & mask), prefix))
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Cluster(String),
    Node(String),
    Paths(String),
    Join(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Cluster(msg) => write!(f, "cluster: {}", msg),
            ValidationError::Node(msg) => write!(f, "node: {}", msg),
            ValidationError::Paths(msg) => write!(f, "paths: {}", msg),
            ValidationError::Join(msg) => write!(f, "join: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl KubebootConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.cluster.certificates_dir.as_os_str().is_empty() {
            errors.push(ValidationError::Cluster(
                "certificates_dir cannot be empty".to_string(),
            ));
        }
        if let Err(e) = self.cluster.service_addresses() {
            errors.push(ValidationError::Cluster(e));
        }
        if self.cluster.etcd.local_data_dir.is_some() && self.cluster.etcd.is_external() {
            errors.push(ValidationError::Cluster(
                "etcd: local_data_dir and external_endpoints are mutually exclusive".to_string(),
            ));
        }
        if self.cluster.api_server_timeout_secs == 0 {
            errors.push(ValidationError::Cluster(
                "api_server_timeout_secs must be positive".to_string(),
            ));
        }

        if self.api_endpoint.bind_port == 0 {
            errors.push(ValidationError::Node(
                "api_endpoint.bind_port must be between 1 and 65535".to_string(),
            ));
        }
        if let Err(e) = resolve_ignore_preflight_errors(&self.node.ignore_preflight_errors, &[]) {
            errors.push(ValidationError::Node(e));
        }

        for (name, path) in [
            ("kubernetes_dir", &self.paths.kubernetes_dir),
            ("manifests_dir", &self.paths.manifests_dir),
            ("kubelet_dir", &self.paths.kubelet_dir),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::Paths(format!("{} cannot be empty", name)));
            }
        }

        if !self.join.tls_bootstrap_token.is_empty() || !self.join.token.is_empty() {
            if let Err(e) = crate::phases::token::validate_token(self.join.bootstrap_token()) {
                errors.push(ValidationError::Join(e.to_string()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Merge preflight ignore entries from flags and config into one lowercased
/// set. `all` may not be combined with anything else.
pub fn resolve_ignore_preflight_errors(
    from_config: &[String],
    from_flags: &[String],
) -> Result<BTreeSet<String>, String> {
    let set: BTreeSet<String> = from_config
        .iter()
        .chain(from_flags)
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();

    if set.contains("all") && set.len() > 1 {
        return Err(format!(
            "don't specify individual checks if 'all' is used: {:?}",
            set.iter().filter(|e| e.as_str() != "all").collect::<Vec<_>>()
        ));
    }
    Ok(set)
}
