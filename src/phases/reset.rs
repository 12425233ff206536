//! The `reset` workflow: revert what `init` or `join` did to this host.

use crate::cli::options;
use crate::cluster::host::clean_dir;
use crate::phases::init::kubeconfig::{
    ADMIN_KUBECONFIG, BOOTSTRAP_KUBELET_KUBECONFIG, CONTROLLER_MANAGER_KUBECONFIG,
    KUBELET_KUBECONFIG, SCHEDULER_KUBECONFIG,
};
use crate::phases::preflight::run_root_check_only;
use crate::phases::ResetData;
use crate::workflow::Phase;
use anyhow::{anyhow, bail, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ETCD_MANIFEST: &str = "etcd.yaml";
pub const API_SERVER_MANIFEST: &str = "kube-apiserver.yaml";
const ETCD_DATA_VOLUME: &str = "etcd-data";

/// Every `reset` phase in execution order.
pub fn reset_phases<D: ResetData + 'static>() -> Vec<Phase<D>> {
    vec![
        new_preflight_phase(),
        new_update_cluster_status_phase(),
        new_remove_etcd_member_phase(),
        new_cleanup_node_phase(),
    ]
}

pub fn new_preflight_phase<D: ResetData + 'static>() -> Phase<D> {
    Phase::new("preflight")
        .alias("pre-flight")
        .short("Run reset pre-flight checks")
        .long("Run pre-flight checks for kubeboot reset.")
        .inherit_flags([options::IGNORE_PREFLIGHT_ERRORS, options::FORCE_RESET])
        .run(|data: &mut D| {
            let console = data.console();
            if !data.force_reset() {
                console.println("[reset] WARNING: Changes made to this host by 'kubeboot init' or 'kubeboot join' will be reverted.")?;
                console.print("[reset] Are you sure you want to proceed? [y/N]: ")?;
                let answer = console.read_line()?;
                if answer.trim() != "y" {
                    bail!("aborted reset operation");
                }
            }

            console.println("[preflight] Running pre-flight checks")?;
            run_root_check_only(console, data.ignore_preflight_errors())
        })
}

pub fn new_update_cluster_status_phase<D: ResetData + 'static>() -> Phase<D> {
    Phase::new("update-cluster-status")
        .short("Remove this node from the ClusterStatus object (DEPRECATED).")
        .run(|data: &mut D| {
            let manifest = data.paths().manifests_dir.join(API_SERVER_MANIFEST);
            if manifest.exists() && data.cfg().is_some() {
                data.console().println(
                    "The 'update-cluster-status' phase is deprecated and will be removed in a future release. \
                     Currently it performs no operation",
                )?;
            }
            Ok(())
        })
}

/// Host path of the `etcd-data` volume in a static Pod manifest.
///
/// Only the `volumes` list is inspected; entries are separated by their
/// leading `- `.
pub fn etcd_data_dir_from_manifest(manifest: &str) -> Option<String> {
    let mut in_volumes = false;
    let mut volumes_indent = 0;
    let mut entry_indent = None;
    let mut entries: Vec<Vec<&str>> = Vec::new();

    for line in manifest.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        if trimmed == "volumes:" {
            in_volumes = true;
            volumes_indent = indent;
            continue;
        }
        if !in_volumes {
            continue;
        }
        if indent < volumes_indent || (indent == volumes_indent && !trimmed.starts_with("- ")) {
            in_volumes = false;
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("- ") {
            if entry_indent.map_or(true, |i| i == indent) {
                entry_indent = Some(indent);
                entries.push(vec![rest.trim()]);
                continue;
            }
        }
        if let Some(entry) = entries.last_mut() {
            entry.push(trimmed);
        }
    }

    entries.into_iter().find_map(|entry| {
        let value = |key: &str| {
            entry.iter().find_map(|item| {
                item.strip_prefix(key)
                    .map(|v| v.trim().trim_matches('"').to_string())
            })
        };
        if value("name:").as_deref() == Some(ETCD_DATA_VOLUME) {
            value("path:").filter(|path| !path.is_empty())
        } else {
            None
        }
    })
}

fn etcd_data_dir<D: ResetData>(data: &D) -> Result<PathBuf> {
    if let Some(dir) = data.cfg().and_then(|cfg| cfg.cluster.etcd.data_dir()) {
        return Ok(dir);
    }
    warn!("no cluster configuration, using the etcd pod spec to get the data directory");
    let manifest_path = data.paths().manifests_dir.join(ETCD_MANIFEST);
    let manifest = fs::read_to_string(&manifest_path)?;
    etcd_data_dir_from_manifest(&manifest)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("invalid etcd pod manifest {}", manifest_path.display()))
}

pub fn new_remove_etcd_member_phase<D: ResetData + 'static>() -> Phase<D> {
    Phase::new("remove-etcd-member")
        .short("Remove a local etcd member.")
        .long("Remove a local etcd member for a control plane node.")
        .run(|data: &mut D| {
            debug!("checking for etcd config");
            match etcd_data_dir(&*data) {
                Ok(dir) => {
                    data.add_dir_to_clean(dir);
                    if data.cfg().is_some() {
                        if let Err(e) = data.collaborators().etcd.remove_member(data.node_name()) {
                            warn!(
                                error = %format!("{:#}", e),
                                "failed to remove etcd member, please manually remove this etcd member using etcdctl"
                            );
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "no local etcd data directory");
                    let console = data.console();
                    console.println("[reset] No etcd config found. Assuming external etcd")?;
                    console.println("[reset] Please, manually reset etcd to prevent further issues")?;
                }
            }
            Ok(())
        })
}

fn remove_containers<D: ResetData>(data: &D) -> Result<()> {
    let runtime = data.collaborators().runtime.as_ref();
    let containers = runtime.list_kube_containers(data.cri_socket())?;
    if containers.is_empty() {
        return Ok(());
    }
    runtime.remove_containers(data.cri_socket(), &containers)
}

/// Empty the manifests and certificate directories and remove the
/// kubeconfig files written by `init` and `join`.
fn reset_config_dir<D: ResetData>(data: &D) -> Result<()> {
    let console = data.console();
    let paths = data.paths();
    let dirs = [paths.manifests_dir.clone(), data.cert_dir()];
    console.println(format!(
        "[reset] Deleting contents of config directories: {}",
        display_list(&dirs)
    ))?;
    for dir in &dirs {
        if let Err(e) = clean_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "failed to delete directory contents");
        }
    }

    let files: Vec<PathBuf> = [
        ADMIN_KUBECONFIG,
        KUBELET_KUBECONFIG,
        BOOTSTRAP_KUBELET_KUBECONFIG,
        CONTROLLER_MANAGER_KUBECONFIG,
        SCHEDULER_KUBECONFIG,
    ]
    .iter()
    .map(|file| paths.kubernetes_dir.join(file))
    .collect();
    console.println(format!("[reset] Deleting files: {}", display_list(&files)))?;
    for file in &files {
        if let Err(e) = fs::remove_file(file) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(file = %file.display(), error = %e, "failed to remove file");
            }
        }
    }
    Ok(())
}

/// `[a b c]`, the list format of the reset notices.
pub fn display_list<P: AsRef<Path>>(paths: &[P]) -> String {
    let items: Vec<String> = paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect();
    format!("[{}]", items.join(" "))
}

pub fn new_cleanup_node_phase<D: ResetData + 'static>() -> Phase<D> {
    Phase::new("cleanup-node")
        .short("Run cleanup node.")
        .inherit_flags([
            options::CERTIFICATES_DIR,
            options::NODE_CRI_SOCKET,
            options::FORCE_RESET,
        ])
        .run(|data: &mut D| {
            let console = data.console();
            let collaborators = data.collaborators();

            console.println("[reset] Stopping the kubelet service")?;
            if let Err(e) = collaborators.kubelet.stop() {
                warn!(error = %format!("{:#}", e), "the kubelet service could not be stopped, please ensure kubelet is stopped manually");
            }

            let kubelet_dir = data.paths().kubelet_dir.clone();
            console.println(format!(
                "[reset] Unmounting mounted directories in {:?}",
                kubelet_dir.display().to_string()
            ))?;
            let unmounted = match collaborators.runtime.unmount_under(&kubelet_dir) {
                Ok(()) => true,
                Err(e) => {
                    warn!(dir = %kubelet_dir.display(), error = %format!("{:#}", e), "failed to unmount directories");
                    false
                }
            };

            console.println("[reset] Removing kubernetes-managed containers")?;
            if let Err(e) = remove_containers(&*data) {
                warn!(error = %format!("{:#}", e), "failed to remove containers");
            }

            let cert_dir = data.cert_dir();
            if cert_dir != Path::new(crate::config::DEFAULT_CERTIFICATES_DIR) {
                warn!(dir = %cert_dir.display(), "cleaning a non-default certificates directory");
            }
            reset_config_dir(&*data)?;

            if unmounted {
                data.add_dir_to_clean(kubelet_dir);
            }
            Ok(())
        })
}
