//! Host implementations driving local tools (`systemctl`, `docker`,
//! `crictl`, `umount`) and the filesystem.

use crate::cluster::{
    ContainerRuntime, KubeletService, RuntimeDetector, CONTAINERD_SOCKET, CRIO_SOCKET,
    DEFAULT_CRI_SOCKET, DOCKER_SOCKET,
};
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "executing");
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {}", program))?;
    if !output.status.success() {
        bail!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The kubelet as a systemd unit.
pub struct SystemdKubelet;

impl SystemdKubelet {
    fn systemctl(&self, verb: &str) -> Result<()> {
        run("systemctl", &[verb, "kubelet"]).map(|_| ())
    }
}

impl KubeletService for SystemdKubelet {
    fn stop(&self) -> Result<()> {
        self.systemctl("stop")
    }

    fn start(&self) -> Result<()> {
        self.systemctl("start")
    }

    fn restart(&self) -> Result<()> {
        self.systemctl("restart")
    }
}

/// Finds the CRI socket by probing the well-known socket paths.
pub struct SocketRuntimeDetector;

impl RuntimeDetector for SocketRuntimeDetector {
    fn detect_cri_socket(&self) -> Result<String> {
        detect_cri_socket_with(is_socket)
    }
}

/// Docker wins over containerd, since docker runs on top of it. No runtime
/// found means the docker default; several distinct runtimes is an error.
pub fn detect_cri_socket_with(is_socket: impl Fn(&Path) -> bool) -> Result<String> {
    let mut found = Vec::new();

    if is_socket(Path::new(DOCKER_SOCKET)) {
        found.push(DEFAULT_CRI_SOCKET);
    } else if is_socket(Path::new(CONTAINERD_SOCKET)) {
        found.push(CONTAINERD_SOCKET);
    }
    if is_socket(Path::new(CRIO_SOCKET)) {
        found.push(CRIO_SOCKET);
    }

    match found.as_slice() {
        [] => Ok(DEFAULT_CRI_SOCKET.to_string()),
        [socket] => Ok(socket.to_string()),
        many => Err(anyhow!(
            "Found multiple CRI sockets, please use --cri-socket to select one: {}",
            many.join(", ")
        )),
    }
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_socket(_path: &Path) -> bool {
    false
}

/// `docker` for the dockershim socket, `crictl` for everything else.
pub struct CliContainerRuntime;

fn is_docker(cri_socket: &str) -> bool {
    cri_socket == DEFAULT_CRI_SOCKET
}

impl ContainerRuntime for CliContainerRuntime {
    fn list_kube_containers(&self, cri_socket: &str) -> Result<Vec<String>> {
        let out = if is_docker(cri_socket) {
            run("docker", &["ps", "-a", "--filter", "name=k8s_", "-q"])?
        } else {
            run("crictl", &["-r", cri_socket, "pods", "-q"])?
        };
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn remove_containers(&self, cri_socket: &str, ids: &[String]) -> Result<()> {
        let mut failed = Vec::new();
        for id in ids {
            let result = if is_docker(cri_socket) {
                run("docker", &["stop", id]).and_then(|_| run("docker", &["rm", "--volumes", id]))
            } else {
                run("crictl", &["-r", cri_socket, "stopp", id])
                    .and_then(|_| run("crictl", &["-r", cri_socket, "rmp", id]))
            };
            if let Err(e) = result {
                failed.push(format!("{}: {}", id, e));
            }
        }
        if !failed.is_empty() {
            bail!("failed to remove containers: {}", failed.join("; "));
        }
        Ok(())
    }

    fn pull_image(&self, cri_socket: &str, image: &str) -> Result<()> {
        if is_docker(cri_socket) {
            run("docker", &["pull", image])?;
        } else {
            run("crictl", &["-r", cri_socket, "pull", image])?;
        }
        Ok(())
    }

    fn image_exists(&self, cri_socket: &str, image: &str) -> Result<bool> {
        let result = if is_docker(cri_socket) {
            run("docker", &["inspect", image])
        } else {
            run("crictl", &["-r", cri_socket, "inspecti", image])
        };
        Ok(result.is_ok())
    }

    fn unmount_under(&self, dir: &Path) -> Result<()> {
        let mounts = match fs::read_to_string("/proc/mounts") {
            Ok(mounts) => mounts,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("failed to read /proc/mounts"),
        };
        for target in mount_points_under(&mounts, dir) {
            let target = target.to_string_lossy().into_owned();
            run("umount", &[target.as_str()])?;
        }
        Ok(())
    }
}

/// Mount points from a `/proc/mounts` listing lying strictly below `dir`,
/// deepest first.
pub fn mount_points_under(mounts: &str, dir: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(PathBuf::from)
        .filter(|target| target != dir && target.starts_with(dir))
        .collect();
    targets.sort_by_key(|t| std::cmp::Reverse(t.components().count()));
    targets
}

/// Removes everything inside `dir`, keeping the directory itself. A missing
/// directory is not an error.
pub fn clean_dir(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Lowercased host name, used as the default node name.
pub fn hostname() -> Result<String> {
    let raw = match fs::read_to_string("/proc/sys/kernel/hostname") {
        Ok(name) => name,
        Err(_) => run("hostname", &[])?,
    };
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(anyhow!("couldn't determine hostname"));
    }
    Ok(name)
}
