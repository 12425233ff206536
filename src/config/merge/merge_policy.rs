//! Merge rules: defaults, override order, conflict handling.

use crate::config::{
    DEFAULT_API_SERVER_TIMEOUT_SECS, DEFAULT_BIND_PORT, DEFAULT_CERTIFICATES_DIR,
    DEFAULT_DNS_DOMAIN, DEFAULT_KUBELET_DIR, DEFAULT_KUBERNETES_DIR, DEFAULT_KUBERNETES_VERSION,
    DEFAULT_MANIFESTS_DIR, DEFAULT_SERVICE_SUBNET,
};
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources replace whole values; lists are not concatenated.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("cluster.kubernetes_version", DEFAULT_KUBERNETES_VERSION)?
        .set_default("cluster.certificates_dir", DEFAULT_CERTIFICATES_DIR)?
        .set_default("cluster.service_subnet", DEFAULT_SERVICE_SUBNET)?
        .set_default("cluster.dns_domain", DEFAULT_DNS_DOMAIN)?
        .set_default(
            "cluster.api_server_timeout_secs",
            DEFAULT_API_SERVER_TIMEOUT_SECS,
        )?
        .set_default("api_endpoint.bind_port", DEFAULT_BIND_PORT as i64)?
        .set_default("paths.kubernetes_dir", DEFAULT_KUBERNETES_DIR)?
        .set_default("paths.manifests_dir", DEFAULT_MANIFESTS_DIR)?
        .set_default("paths.kubelet_dir", DEFAULT_KUBELET_DIR)
}
