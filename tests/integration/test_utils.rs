//! Shared test utilities for integration tests
//!
//! Provides an isolated command harness (recording collaborators, buffered
//! console, temp directories) and serialized XDG environment access.

use kubeboot::cli::{App, CommandEnv};
use kubeboot::cluster::{Collaborators, DryRunCluster, CONTAINERD_SOCKET};
use kubeboot::config::KubebootConfig;
use kubeboot::error::CommandError;
use kubeboot::phases::{Captured, Console};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub const TOKEN: &str = "abcdef.0123456789abcdef";

/// Global mutex to serialize XDG environment variable access across all tests
/// This prevents race conditions when tests run in parallel
static XDG_ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Run `f` with `XDG_CONFIG_HOME` and `HOME` pointing into `test_dir`,
/// restoring the original values afterwards.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let home = std::env::var("HOME").ok();
    let xdg_config_home = std::env::var("XDG_CONFIG_HOME").ok();

    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());
    std::env::set_var("HOME", test_dir.path().join("home"));

    let result = f();

    match home {
        Some(orig) => std::env::set_var("HOME", orig),
        None => std::env::remove_var("HOME"),
    }
    match xdg_config_home {
        Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}

/// One isolated host: every directory lives in a temp dir and every
/// collaborator records into `cluster`.
pub struct Harness {
    pub temp: TempDir,
    pub cluster: DryRunCluster,
    pub output: Captured,
    console: Console,
    config_path: PathBuf,
}

impl Harness {
    pub fn new(cluster: DryRunCluster) -> Self {
        Self::with_input(cluster, "")
    }

    /// `input` is what the console reads, e.g. prompt answers.
    pub fn with_input(cluster: DryRunCluster, input: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let (console, output) = Console::buffered(input);
        let config_path = temp.path().join("kubeboot.toml");
        let harness = Self {
            temp,
            cluster,
            output,
            console,
            config_path,
        };
        harness.write_config(&harness.base_config());
        harness
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Config with every path below [`Harness::root`] and all preflight
    /// errors downgraded to warnings.
    pub fn base_config(&self) -> KubebootConfig {
        let root = self.root();
        let mut cfg = KubebootConfig::default();
        cfg.cluster.certificates_dir = root.join("pki");
        cfg.cluster.etcd.local_data_dir = Some(root.join("etcd"));
        cfg.paths.kubernetes_dir = root.to_path_buf();
        cfg.paths.manifests_dir = root.join("manifests");
        cfg.paths.kubelet_dir = root.join("kubelet");
        cfg.node.name = "cp-1".to_string();
        cfg.node.cri_socket = CONTAINERD_SOCKET.to_string();
        cfg.node.ignore_preflight_errors = vec!["all".to_string()];
        cfg.api_endpoint.advertise_address = "10.0.0.1".to_string();
        cfg
    }

    pub fn write_config(&self, cfg: &KubebootConfig) {
        std::fs::write(&self.config_path, toml::to_string(cfg).unwrap()).unwrap();
    }

    pub fn app(&self) -> App {
        App::new(CommandEnv::isolated(
            Collaborators::recording(self.cluster.clone()),
            self.console.clone(),
            self.root().join("scratch"),
        ))
    }

    /// Run `kubeboot <args> --config <harness config>`.
    pub fn run(&self, args: &[&str]) -> Result<(), CommandError> {
        let config = self.config_path.display().to_string();
        let argv = std::iter::once("kubeboot")
            .chain(args.iter().copied())
            .chain(["--config", config.as_str()]);
        self.app().run(argv)
    }

    pub fn text(&self) -> String {
        self.output.text()
    }
}
