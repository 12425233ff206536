//! Preflight checks run before a workflow changes the host.
//!
//! Every check yields warnings and errors. Errors of checks named in the
//! ignore set (or all checks, for `all`) are downgraded to warnings.
//! Remaining errors abort with a [`PreflightError`].

use crate::cluster::ContainerRuntime;
use crate::config::KubebootConfig;
use crate::error::PreflightError;
use crate::phases::Console;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

pub const IMAGE_REPOSITORY: &str = "k8s.gcr.io";
pub const PAUSE_VERSION: &str = "3.5";
pub const ETCD_VERSION: &str = "3.5.0-0";
pub const COREDNS_VERSION: &str = "v1.8.4";

pub const KUBELET_PORT: u16 = 10250;
pub const SCHEDULER_PORT: u16 = 10259;
pub const CONTROLLER_MANAGER_PORT: u16 = 10257;
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;

pub const CONTROL_PLANE_MANIFESTS: &[&str] = &[
    "kube-apiserver.yaml",
    "kube-controller-manager.yaml",
    "kube-scheduler.yaml",
    "etcd.yaml",
];

pub trait Checker {
    fn name(&self) -> String;
    /// Warnings and errors, in that order.
    fn check(&self) -> (Vec<String>, Vec<String>);
}

fn path_check_name(prefix: &str, path: &Path) -> String {
    format!("{}-{}", prefix, path.display().to_string().replace('/', "-"))
}

/// Fails unless the effective user is root.
pub struct IsPrivilegedUserCheck {
    /// Effective uid to check instead of the process's own.
    pub euid: Option<u32>,
}

impl IsPrivilegedUserCheck {
    pub fn new() -> Self {
        Self { euid: None }
    }
}

impl Default for IsPrivilegedUserCheck {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_uid() -> io::Result<u32> {
    let status = fs::read_to_string("/proc/self/status")?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no Uid line in /proc/self/status"))
}

impl Checker for IsPrivilegedUserCheck {
    fn name(&self) -> String {
        "IsPrivilegedUser".to_string()
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        let euid = match self.euid.map(Ok).unwrap_or_else(effective_uid) {
            Ok(euid) => euid,
            Err(e) => return (Vec::new(), vec![format!("unable to determine the current user: {}", e)]),
        };
        if euid != 0 {
            return (Vec::new(), vec!["user is not running as root".to_string()]);
        }
        (Vec::new(), Vec::new())
    }
}

/// Fails if the directory exists and is not empty.
pub struct DirAvailableCheck {
    pub path: PathBuf,
}

impl Checker for DirAvailableCheck {
    fn name(&self) -> String {
        path_check_name("DirAvailable", &self.path)
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        let occupied = fs::read_dir(&self.path).map(|mut entries| entries.next().is_some());
        match occupied {
            Ok(true) => (
                Vec::new(),
                vec![format!("{} is not empty", self.path.display())],
            ),
            _ => (Vec::new(), Vec::new()),
        }
    }
}

/// Fails if the file already exists.
pub struct FileAvailableCheck {
    pub path: PathBuf,
}

impl Checker for FileAvailableCheck {
    fn name(&self) -> String {
        path_check_name("FileAvailable", &self.path)
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        if self.path.exists() {
            return (
                Vec::new(),
                vec![format!("{} already exists", self.path.display())],
            );
        }
        (Vec::new(), Vec::new())
    }
}

/// Fails unless a file can be created in the directory, or in its nearest
/// existing ancestor when it does not exist yet.
pub struct DirWritableCheck {
    pub path: PathBuf,
}

impl Checker for DirWritableCheck {
    fn name(&self) -> String {
        path_check_name("DirWritable", &self.path)
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        let Some(existing) = self.path.ancestors().find(|p| p.is_dir()) else {
            return (
                Vec::new(),
                vec![format!("no existing ancestor of {}", self.path.display())],
            );
        };
        let probe = existing.join(".kubeboot-preflight-probe");
        let result = fs::write(&probe, b"").and_then(|_| fs::remove_file(&probe));
        match result {
            Ok(()) => (Vec::new(), Vec::new()),
            Err(e) => (
                Vec::new(),
                vec![format!("{} is not writable: {}", existing.display(), e)],
            ),
        }
    }
}

/// Fails if the TCP port is already bound.
pub struct PortOpenCheck {
    pub port: u16,
}

impl Checker for PortOpenCheck {
    fn name(&self) -> String {
        format!("Port-{}", self.port)
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        match TcpListener::bind(("0.0.0.0", self.port)) {
            Ok(_) => (Vec::new(), Vec::new()),
            Err(_) => (Vec::new(), vec![format!("Port {} is in use", self.port)]),
        }
    }
}

/// Pulls every image not yet present in the runtime.
pub struct ImagePullCheck {
    pub runtime: Rc<dyn ContainerRuntime>,
    pub cri_socket: String,
    pub images: Vec<String>,
}

impl Checker for ImagePullCheck {
    fn name(&self) -> String {
        "ImagePull".to_string()
    }

    fn check(&self) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        for image in &self.images {
            match self.runtime.image_exists(&self.cri_socket, image) {
                Ok(true) => {
                    debug!(image = %image, "image exists");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    errors.push(format!("failed to check if image {} exists: {:#}", image, e));
                    continue;
                }
            }
            debug!(image = %image, "pulling image");
            if let Err(e) = self.runtime.pull_image(&self.cri_socket, image) {
                errors.push(format!("failed to pull image {}: {:#}", image, e));
            }
        }
        (Vec::new(), errors)
    }
}

/// Run `checks`, printing warnings to the console.
pub fn run_checks(
    checks: &[Box<dyn Checker>],
    console: &Console,
    ignore: &BTreeSet<String>,
) -> anyhow::Result<()> {
    let mut fatal = Vec::new();
    for check in checks {
        let name = check.name();
        let (mut warnings, mut errors) = check.check();
        if ignore.contains("all") || ignore.contains(&name.to_lowercase()) {
            warnings.append(&mut errors);
        }
        for warning in warnings {
            console.println(format!("\t[WARNING {}]: {}", name, warning))?;
        }
        fatal.extend(errors.into_iter().map(|e| format!("[ERROR {}]: {}", name, e)));
    }
    if !fatal.is_empty() {
        return Err(PreflightError(fatal).into());
    }
    Ok(())
}

pub fn run_root_check_only(console: &Console, ignore: &BTreeSet<String>) -> anyhow::Result<()> {
    let checks: Vec<Box<dyn Checker>> = vec![Box::new(IsPrivilegedUserCheck::new())];
    run_checks(&checks, console, ignore)
}

/// Checks for a host about to run control-plane components.
pub fn control_plane_checks(cfg: &KubebootConfig, manifest_dir: &Path) -> Vec<Box<dyn Checker>> {
    let mut checks: Vec<Box<dyn Checker>> = vec![
        Box::new(PortOpenCheck {
            port: cfg.api_endpoint.bind_port,
        }),
        Box::new(PortOpenCheck {
            port: CONTROLLER_MANAGER_PORT,
        }),
        Box::new(PortOpenCheck {
            port: SCHEDULER_PORT,
        }),
    ];
    for manifest in CONTROL_PLANE_MANIFESTS {
        checks.push(Box::new(FileAvailableCheck {
            path: manifest_dir.join(manifest),
        }));
    }
    if let Some(data_dir) = cfg.cluster.etcd.data_dir() {
        checks.push(Box::new(PortOpenCheck {
            port: ETCD_CLIENT_PORT,
        }));
        checks.push(Box::new(PortOpenCheck {
            port: ETCD_PEER_PORT,
        }));
        checks.push(Box::new(DirAvailableCheck { path: data_dir }));
    }
    checks
}

/// Checks for any host about to run a kubelet.
pub fn node_checks(kubernetes_dir: &Path) -> Vec<Box<dyn Checker>> {
    vec![
        Box::new(IsPrivilegedUserCheck::new()),
        Box::new(DirWritableCheck {
            path: kubernetes_dir.to_path_buf(),
        }),
        Box::new(PortOpenCheck { port: KUBELET_PORT }),
    ]
}

/// Images a control-plane node of `cfg` runs.
pub fn control_plane_images(cfg: &KubebootConfig) -> Vec<String> {
    let version = &cfg.cluster.kubernetes_version;
    let mut images: Vec<String> = [
        "kube-apiserver",
        "kube-controller-manager",
        "kube-scheduler",
        "kube-proxy",
    ]
    .iter()
    .map(|component| format!("{}/{}:{}", IMAGE_REPOSITORY, component, version))
    .collect();
    images.push(format!("{}/pause:{}", IMAGE_REPOSITORY, PAUSE_VERSION));
    if !cfg.cluster.etcd.is_external() {
        images.push(format!("{}/etcd:{}", IMAGE_REPOSITORY, ETCD_VERSION));
    }
    images.push(format!(
        "{}/coredns/coredns:{}",
        IMAGE_REPOSITORY, COREDNS_VERSION
    ));
    images
}
