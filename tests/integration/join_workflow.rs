//! Integration tests for `kubeboot join`

use crate::integration::test_utils::{Harness, TOKEN};
use kubeboot::cluster::DryRunCluster;
use kubeboot::error::{CommandError, WorkflowError};

/// Cluster state as left behind by `kubeboot init` on another host.
fn initialized_cluster(harness_cfg: &kubeboot::config::KubebootConfig) -> DryRunCluster {
    DryRunCluster::new().with_uploaded_config(&toml::to_string(harness_cfg).unwrap())
}

#[test]
fn test_worker_join_starts_kubelet_only() {
    let seed = Harness::new(DryRunCluster::new());
    let harness = Harness::new(initialized_cluster(&seed.base_config()));
    harness
        .run(&["join", "10.0.0.1:6443", "--token", TOKEN, "--node-name", "worker-1"])
        .unwrap();

    assert_eq!(
        harness.cluster.operations(),
        vec![
            "fetch-config".to_string(),
            "write-kubeconfig bootstrap-kubelet.conf".to_string(),
            "node-ready worker-1".to_string(),
            "kubelet-stop".to_string(),
            "kubelet-start".to_string(),
            format!("annotate-cri-socket worker-1 {}", kubeboot::cluster::CONTAINERD_SOCKET),
        ]
    );
    assert!(!harness.root().join("bootstrap-kubelet.conf").exists());
    assert!(harness.root().join("kubelet/config.yaml").is_file());

    let text = harness.text();
    assert!(text.contains("[preflight] Reading configuration from the cluster..."));
    assert!(text.contains("This node has joined the cluster:"));
}

#[test]
fn test_control_plane_join_after_init() {
    let harness = Harness::new(DryRunCluster::new());
    let mut cfg = harness.base_config();
    cfg.cluster.control_plane_endpoint = "lb.example.com:6443".to_string();
    harness.write_config(&cfg);
    harness.run(&["init", "--token", TOKEN]).unwrap();
    let init_ops = harness.cluster.operations().len();

    harness
        .run(&[
            "join",
            "lb.example.com:6443",
            "--token",
            TOKEN,
            "--control-plane",
            "--node-name",
            "cp-2",
            "--apiserver-advertise-address",
            "10.0.0.2",
        ])
        .unwrap();

    let join_ops: Vec<String> = harness.cluster.operations()[init_ops..].to_vec();
    assert!(join_ops.contains(&"etcd-health https://lb.example.com:2379".to_string()));
    assert!(join_ops.contains(&"etcd-add-member cp-2 https://10.0.0.2:2380".to_string()));
    assert!(join_ops
        .iter()
        .any(|op| op.starts_with("mark-control-plane cp-2 ")));
    assert_eq!(harness.cluster.etcd_members(), vec!["cp-2"]);

    let text = harness.text();
    assert!(text.contains("a new control plane instance was created"));
    assert!(text.contains("* A new etcd member was added to the local/stacked etcd cluster."));
}

#[test]
fn test_control_plane_join_requires_shared_certificates() {
    let seed = Harness::new(DryRunCluster::new());
    let mut cluster_cfg = seed.base_config();
    cluster_cfg.cluster.control_plane_endpoint = "lb.example.com:6443".to_string();
    let harness = Harness::new(initialized_cluster(&cluster_cfg));

    let err = harness
        .run(&["join", "lb.example.com:6443", "--token", TOKEN, "--control-plane"])
        .unwrap_err();

    assert!(matches!(
        err,
        CommandError::Workflow(WorkflowError::Action { ref phase, .. }) if phase == "preflight"
    ));
    assert!(err.to_string().contains("missing shared certificates"));
    assert!(err.to_string().contains("ca.crt, ca.key"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_control_plane_join_requires_stable_endpoint() {
    let seed = Harness::new(DryRunCluster::new());
    let harness = Harness::new(initialized_cluster(&seed.base_config()));

    let err = harness
        .run(&["join", "10.0.0.1:6443", "--token", TOKEN, "--control-plane"])
        .unwrap_err();

    assert!(err
        .to_string()
        .contains("doesn't have a stable controlPlaneEndpoint address"));
}

#[test]
fn test_ready_node_with_same_name_is_rejected() {
    let seed = Harness::new(DryRunCluster::new());
    let harness = Harness::new(initialized_cluster(&seed.base_config()).with_ready_node("cp-1"));

    let err = harness
        .run(&["join", "10.0.0.1:6443", "--token", TOKEN])
        .unwrap_err();

    assert_eq!(
        err.to_string().split(':').next(),
        Some("error execution phase kubelet-start")
    );
    assert!(err.to_string().contains("already exists in the cluster"));
    assert!(!harness
        .cluster
        .operation_names()
        .contains(&"kubelet-start".to_string()));
}

#[test]
fn test_missing_endpoint_is_a_validation_error() {
    let harness = Harness::new(DryRunCluster::new());
    let err = harness.run(&["join", "--token", TOKEN]).unwrap_err();

    assert_eq!(err.exit_code(), 3);
    assert!(err
        .to_string()
        .contains("join: an API server endpoint to join is required"));
    assert!(harness.cluster.operations().is_empty());
}

#[test]
fn test_kubelet_start_phase_takes_the_endpoint_positional() {
    let seed = Harness::new(DryRunCluster::new());
    let harness = Harness::new(initialized_cluster(&seed.base_config()));
    harness
        .run(&["join", "phase", "kubelet-start", "10.0.0.1:6443", "--token", TOKEN])
        .unwrap();

    let names = harness.cluster.operation_names();
    assert_eq!(names.first().map(String::as_str), Some("fetch-config"));
    assert!(names.contains(&"kubelet-start".to_string()));
    assert!(!harness.text().contains("This node has joined the cluster"));
}
