//! Kubelet configuration shared by the `init` and `join` kubelet-start phases.

use crate::cluster::{KubeletService, DEFAULT_CRI_SOCKET};
use crate::config::KubebootConfig;
use crate::phases::preflight::{IMAGE_REPOSITORY, PAUSE_VERSION};
use crate::phases::Console;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub const KUBELET_ENV_FILE: &str = "kubeadm-flags.env";
pub const KUBELET_CONFIG_FILE: &str = "config.yaml";

/// Flags the kubelet is started with, one `--flag=value` per entry.
pub fn kubelet_flags(node_name: &str, cri_socket: &str, taints: Option<&[String]>) -> Vec<String> {
    let mut flags = Vec::new();
    if cri_socket == DEFAULT_CRI_SOCKET {
        flags.push("--network-plugin=cni".to_string());
        flags.push(format!(
            "--pod-infra-container-image={}/pause:{}",
            IMAGE_REPOSITORY, PAUSE_VERSION
        ));
    } else {
        flags.push("--container-runtime=remote".to_string());
        flags.push(format!("--container-runtime-endpoint=unix://{}", cri_socket));
    }
    if !node_name.is_empty() {
        flags.push(format!("--hostname-override={}", node_name));
    }
    if let Some(taints) = taints.filter(|t| !t.is_empty()) {
        flags.push(format!("--register-with-taints={}", taints.join(",")));
    }
    flags
}

/// Writes the kubelet environment file.
pub fn write_env_file(console: &Console, kubelet_dir: &Path, flags: &[String]) -> Result<()> {
    let path = kubelet_dir.join(KUBELET_ENV_FILE);
    console.println(format!(
        "[kubelet-start] Writing kubelet environment file with flags to file {:?}",
        path.display().to_string()
    ))?;
    fs::create_dir_all(kubelet_dir)
        .with_context(|| format!("failed to create directory {}", kubelet_dir.display()))?;
    fs::write(&path, format!("KUBELET_KUBEADM_ARGS=\"{}\"\n", flags.join(" ")))
        .context("error writing a dynamic environment file for the kubelet")
}

/// Writes the kubelet configuration file.
pub fn write_config_file(console: &Console, kubelet_dir: &Path, cfg: &KubebootConfig) -> Result<()> {
    let path = kubelet_dir.join(KUBELET_CONFIG_FILE);
    console.println(format!(
        "[kubelet-start] Writing kubelet configuration to file {:?}",
        path.display().to_string()
    ))?;
    let (_, dns) = cfg
        .cluster
        .service_addresses()
        .map_err(anyhow::Error::msg)
        .context("error writing kubelet configuration to disk")?;
    let body = format!(
        "apiVersion: kubelet.config.k8s.io/v1beta1\n\
         kind: KubeletConfiguration\n\
         authentication:\n\
         \x20 x509:\n\
         \x20   clientCAFile: {ca}\n\
         cgroupDriver: systemd\n\
         clusterDNS:\n\
         - {dns}\n\
         clusterDomain: {domain}\n\
         rotateCertificates: true\n\
         staticPodPath: {manifests}\n",
        ca = cfg.cluster.certificates_dir.join("ca.crt").display(),
        dns = dns,
        domain = cfg.cluster.dns_domain,
        manifests = cfg.paths.manifests_dir.display(),
    );
    fs::create_dir_all(kubelet_dir)
        .with_context(|| format!("failed to create directory {}", kubelet_dir.display()))?;
    fs::write(&path, body).context("error writing kubelet configuration to disk")
}

/// Stop the kubelet while its configuration changes. Failure is a warning.
pub fn try_stop_kubelet(console: &Console, kubelet: &dyn KubeletService) -> Result<()> {
    if let Err(e) = kubelet.stop() {
        console.println(format!(
            "[kubelet-start] WARNING: unable to stop the kubelet service momentarily: [{:#}]",
            e
        ))?;
    }
    Ok(())
}

/// Start the kubelet. Failure is a warning.
pub fn try_start_kubelet(console: &Console, kubelet: &dyn KubeletService) -> Result<()> {
    if let Err(e) = kubelet.start() {
        console.println(format!(
            "[kubelet-start] WARNING: unable to start the kubelet service: [{:#}]",
            e
        ))?;
        console.println("[kubelet-start] Please ensure kubelet is reloaded and running manually.")?;
    }
    Ok(())
}

/// Restart the kubelet. Failure is a warning.
pub fn try_restart_kubelet(console: &Console, kubelet: &dyn KubeletService) -> Result<()> {
    if let Err(e) = kubelet.restart() {
        console.println(format!(
            "[kubelet-start] WARNING: unable to restart the kubelet service momentarily: [{:#}]",
            e
        ))?;
    }
    Ok(())
}
