//! Integration tests for `kubeboot reset`

use crate::integration::test_utils::{Harness, TOKEN};
use kubeboot::cluster::DryRunCluster;
use kubeboot::error::{CommandError, WorkflowError};
use std::fs;

#[test]
fn test_declined_prompt_aborts_without_changes() {
    let harness = Harness::with_input(DryRunCluster::new(), "n\n");
    let err = harness.run(&["reset"]).unwrap_err();

    assert!(matches!(
        err,
        CommandError::Workflow(WorkflowError::Action { ref phase, .. }) if phase == "preflight"
    ));
    assert_eq!(err.to_string(), "error execution phase preflight: aborted reset operation");
    assert!(harness.text().contains("[reset] Are you sure you want to proceed? [y/N]: "));
    assert!(harness.cluster.operations().is_empty());
}

#[test]
fn test_confirmed_prompt_resets_the_node() {
    let harness = Harness::with_input(DryRunCluster::new(), "y\n");
    harness.run(&["reset"]).unwrap();

    let names = harness.cluster.operation_names();
    assert!(names.contains(&"kubelet-stop".to_string()));
    assert!(names.contains(&"list-containers".to_string()));
}

#[test]
fn test_forced_reset_after_init_cleans_the_host() {
    let harness = Harness::new(DryRunCluster::new().with_containers(&["apiserver", "etcd"]));
    harness.run(&["init", "--token", TOKEN]).unwrap();
    fs::create_dir_all(harness.root().join("etcd/member")).unwrap();
    fs::write(harness.root().join("etcd/member/wal"), "data").unwrap();
    let init_ops = harness.cluster.operations().len();

    harness.run(&["reset", "-f"]).unwrap();

    let reset_ops: Vec<String> = harness.cluster.operations()[init_ops..].to_vec();
    assert_eq!(reset_ops.first().map(String::as_str), Some("fetch-config"));
    assert!(reset_ops.contains(&"etcd-remove-member cp-1".to_string()));
    assert!(reset_ops.contains(&"kubelet-stop".to_string()));
    assert!(harness.cluster.containers().is_empty());

    let root = harness.root();
    assert!(!root.join("admin.conf").exists());
    assert!(!root.join("kubelet.conf").exists());
    assert_eq!(fs::read_dir(root.join("pki")).unwrap().count(), 0);
    assert_eq!(fs::read_dir(root.join("etcd")).unwrap().count(), 0);
    assert_eq!(fs::read_dir(root.join("kubelet")).unwrap().count(), 0);

    let text = harness.text();
    assert!(!text.contains("Are you sure"));
    assert!(text.contains("[reset] Deleting contents of stateful directories: ["));
    assert!(text.contains("The reset process does not clean CNI configuration."));
}

#[test]
fn test_reset_without_admin_kubeconfig_leaves_etcd_alone() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["reset", "--force"]).unwrap();

    let names = harness.cluster.operation_names();
    assert!(!names.contains(&"fetch-config".to_string()));
    assert!(!names.contains(&"etcd-remove-member".to_string()));
    assert!(harness
        .text()
        .contains("[reset] No etcd config found. Assuming external etcd"));
}

#[test]
fn test_single_reset_phase_skips_final_cleanup() {
    let harness = Harness::new(DryRunCluster::new());
    harness
        .run(&["reset", "phase", "cleanup-node", "--force"])
        .unwrap();

    assert_eq!(
        harness.cluster.operation_names(),
        vec!["kubelet-stop", "unmount", "list-containers"]
    );
    assert!(!harness.text().contains("stateful directories"));
}
