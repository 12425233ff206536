//! Config loading entry points.

use crate::config::merge::merge_policy::builder_with_defaults;
use crate::config::sources::{environment, explicit_file, global_file};
use crate::config::KubebootConfig;
use config::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Loads [`KubebootConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, environment.
    pub fn load() -> Result<KubebootConfig, ConfigError> {
        Self::load_with(None, true, None)
    }

    /// Defaults, global file, the given file, environment.
    pub fn load_from_file(path: &Path) -> Result<KubebootConfig, ConfigError> {
        Self::load_with(Some(path), true, None)
    }

    /// Full control over the layers; `env` replaces the process environment.
    pub fn load_with(
        path: Option<&Path>,
        include_global: bool,
        env: Option<HashMap<String, String>>,
    ) -> Result<KubebootConfig, ConfigError> {
        let mut builder = builder_with_defaults()?;
        if include_global {
            builder = global_file::add_to_builder(builder)?;
        }
        if let Some(path) = path {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder, env)?;

        let config: KubebootConfig = builder.build()?.try_deserialize()?;
        tracing::debug!(
            kubernetes_version = %config.cluster.kubernetes_version,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Path of the global configuration file, whether or not it exists.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_only() {
        let config = ConfigLoader::load_with(None, false, env(&[])).unwrap();
        assert_eq!(config, KubebootConfig::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("kubeboot.toml");
        std::fs::write(
            &config_file,
            r#"
[cluster]
kubernetes_version = "v1.23.0"
cert_sans = ["lb.example.com"]

[cluster.etcd]
external_endpoints = ["https://10.0.0.5:2379"]

[node]
name = "cp-1"
ignore_preflight_errors = ["Swap"]

[paths]
kubernetes_dir = "/tmp/k8s"

[init]
skip_phases = ["addon/kube-proxy"]
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_with(Some(&config_file), false, env(&[])).unwrap();
        assert_eq!(config.cluster.kubernetes_version, "v1.23.0");
        assert_eq!(config.cluster.cert_sans, vec!["lb.example.com"]);
        assert!(config.cluster.etcd.is_external());
        assert_eq!(config.node.name, "cp-1");
        assert_eq!(config.paths.kubernetes_dir, PathBuf::from("/tmp/k8s"));
        assert_eq!(config.paths.kubelet_dir, PathBuf::from("/var/lib/kubelet"));
        assert_eq!(config.init.skip_phases, vec!["addon/kube-proxy"]);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("kubeboot.toml");
        std::fs::write(&config_file, "[api_endpoint]\nbind_port = 7443\n").unwrap();

        let config = ConfigLoader::load_with(
            Some(&config_file),
            false,
            env(&[
                ("KUBEBOOT__API_ENDPOINT__BIND_PORT", "8443"),
                ("KUBEBOOT__NODE__IGNORE_PREFLIGHT_ERRORS", "swap,numcpu"),
            ]),
        )
        .unwrap();
        assert_eq!(config.api_endpoint.bind_port, 8443);
        assert_eq!(config.node.ignore_preflight_errors, vec!["swap", "numcpu"]);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        assert!(ConfigLoader::load_with(Some(&missing), false, env(&[])).is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("bad.toml");
        std::fs::write(&config_file, "[api_endpoint]\nbind_port = \"many\"\n").unwrap();
        assert!(ConfigLoader::load_with(Some(&config_file), false, env(&[])).is_err());
    }
}
