//! Integration tests for `kubeboot init`

use crate::integration::test_utils::{Harness, TOKEN};
use kubeboot::cluster::DryRunCluster;
use kubeboot::config::KubebootConfig;
use std::fs;

fn position(ops: &[String], name: &str) -> usize {
    ops.iter()
        .position(|op| op == name)
        .unwrap_or_else(|| panic!("operation {:?} not recorded in {:?}", name, ops))
}

#[test]
fn test_full_init_runs_every_phase_in_order() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["init", "--token", TOKEN]).unwrap();

    let ops = harness.cluster.operation_names();
    let order = [
        "pull-image",
        "create-ca",
        "write-kubeconfig",
        "kubelet-stop",
        "kubelet-start",
        "wait-api-server",
        "upload-config",
        "mark-control-plane",
        "create-bootstrap-token",
    ];
    let positions: Vec<usize> = order.iter().map(|name| position(&ops, name)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", ops);
    assert!(!ops.contains(&"upload-certs".to_string()));

    let uploaded: KubebootConfig =
        toml::from_str(&harness.cluster.uploaded_config().unwrap()).unwrap();
    assert_eq!(uploaded.node.name, "cp-1");
    assert_eq!(uploaded.init.bootstrap_tokens, vec![TOKEN]);

    let text = harness.text();
    assert!(text.starts_with("[init] Using Kubernetes version: v1.22.6\n"));
    assert!(text.contains("Your Kubernetes control-plane has initialized successfully!"));
    assert!(text.contains(&format!("kubeboot join 10.0.0.1:6443 --token {}", TOKEN)));
    assert!(
        !text.contains("--control-plane"),
        "no control-plane join without a control plane endpoint"
    );
    assert!(harness.root().join("pki/ca.key").is_file());
    assert!(harness.root().join("admin.conf").is_file());
}

#[test]
fn test_dry_run_writes_to_scratch_directory() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["init", "--dry-run", "--token", TOKEN]).unwrap();

    assert!(!harness.root().join("pki").exists());
    assert!(!harness.root().join("admin.conf").exists());
    let dry_run_dir = harness
        .root()
        .join(format!("scratch/kubeboot-init-dryrun-{}", std::process::id()));
    assert!(dry_run_dir.join("ca.crt").is_file());
    assert!(dry_run_dir.join("admin.conf").is_file());

    let ops = harness.cluster.operation_names();
    assert!(!ops.contains(&"pull-image".to_string()));
    assert!(!ops.contains(&"kubelet-start".to_string()));

    let text = harness.text();
    assert!(text.contains("[preflight] Would pull the required images"));
    assert!(text.contains("[dryrun] Would mark the node as control-plane"));
    assert!(text.ends_with(
        "[dryrun] Finished dry-running successfully. Above are the resources that would be created\n"
    ));
    assert!(!text.contains("initialized successfully"));
}

#[test]
fn test_preflight_failure_exits_with_code_two() {
    let harness = Harness::new(DryRunCluster::new());
    let mut cfg = harness.base_config();
    cfg.node.ignore_preflight_errors = [
        "IsPrivilegedUser",
        "Port-6443",
        "Port-10250",
        "Port-10257",
        "Port-10259",
        "Port-2379",
        "Port-2380",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    harness.write_config(&cfg);
    fs::create_dir_all(harness.root().join("manifests")).unwrap();
    fs::write(harness.root().join("manifests/kube-apiserver.yaml"), "").unwrap();

    let err = harness.run(&["init", "--token", TOKEN]).unwrap_err();

    assert_eq!(err.exit_code(), 2);
    let message = err.to_string();
    assert!(message.starts_with("error execution phase preflight: [preflight] Some fatal errors occurred:"));
    assert!(message.contains("kube-apiserver.yaml already exists"));
    assert!(kubeboot::cli::map_error(&err).contains("--ignore-preflight-errors=..."));
    assert!(harness.cluster.operations().is_empty());
}

#[test]
fn test_invalid_configuration_exits_with_code_three() {
    let harness = Harness::new(DryRunCluster::new());
    let err = harness
        .run(&[
            "init",
            "--apiserver-bind-port",
            "0",
            "--token",
            "not-a-token",
        ])
        .unwrap_err();

    assert_eq!(err.exit_code(), 3);
    let message = err.to_string();
    assert!(message.contains("bind_port must be between 1 and 65535"));
    assert!(message.contains("bootstrap token"));
    assert!(harness.cluster.operations().is_empty());
    assert!(!harness.text().contains("[preflight]"));
}

#[test]
fn test_configured_skip_phases_are_honoured() {
    let harness = Harness::new(DryRunCluster::new());
    let mut cfg = harness.base_config();
    cfg.init.skip_phases = vec!["mark-control-plane".to_string(), "bootstrap-token".to_string()];
    harness.write_config(&cfg);

    harness.run(&["init", "--token", TOKEN]).unwrap();

    let ops = harness.cluster.operation_names();
    assert!(ops.contains(&"upload-config".to_string()));
    assert!(!ops.contains(&"mark-control-plane".to_string()));
    assert!(!ops.contains(&"create-bootstrap-token".to_string()));
}

#[test]
fn test_skip_phases_flag_replaces_configured_list() {
    let harness = Harness::new(DryRunCluster::new());
    let mut cfg = harness.base_config();
    cfg.init.skip_phases = vec!["bootstrap-token".to_string()];
    harness.write_config(&cfg);

    harness
        .run(&["init", "--token", TOKEN, "--skip-phases", "upload-config,certs/sa"])
        .unwrap();

    let ops = harness.cluster.operation_names();
    assert!(!ops.contains(&"upload-config".to_string()));
    assert!(!ops.contains(&"create-sa-keys".to_string()));
    assert!(ops.contains(&"create-ca".to_string()));
    assert!(ops.contains(&"create-bootstrap-token".to_string()));
}

#[test]
fn test_control_plane_endpoint_adds_control_plane_join_instructions() {
    let harness = Harness::new(DryRunCluster::new());
    let mut cfg = harness.base_config();
    cfg.cluster.control_plane_endpoint = "lb.example.com:6443".to_string();
    harness.write_config(&cfg);

    harness
        .run(&["init", "--token", TOKEN, "--upload-certs", "--skip-certificate-key-print"])
        .unwrap();

    assert!(harness
        .cluster
        .operation_names()
        .contains(&"upload-certs".to_string()));
    let text = harness.text();
    assert!(text.contains("You can now join any number of the control-plane node"));
    assert!(text.contains(&format!(
        "kubeboot join lb.example.com:6443 --token {} \\\n\t--control-plane --certificate-key <value withheld>",
        TOKEN
    )));
    assert!(!text.contains("[upload-certs] Using certificate key"));
}
