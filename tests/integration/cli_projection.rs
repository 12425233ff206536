//! Integration tests for the command tree generated from the phase trees.

use crate::integration::test_utils::Harness;
use clap::Command;
use kubeboot::cluster::DryRunCluster;
use kubeboot::error::{CommandError, WorkflowError};

fn find<'a>(cmd: &'a Command, path: &[&str]) -> &'a Command {
    path.iter().fold(cmd, |cmd, name| {
        cmd.find_subcommand(name)
            .unwrap_or_else(|| panic!("no sub-command {:?} below {:?}", name, cmd.get_name()))
    })
}

fn arg_ids(cmd: &Command) -> Vec<String> {
    cmd.get_arguments()
        .filter(|arg| !arg.is_global_set())
        .map(|arg| arg.get_id().to_string())
        .collect()
}

#[test]
fn test_workflow_help_lists_visible_phases() {
    let harness = Harness::new(DryRunCluster::new());
    let root = harness.app().command();
    let init = find(&root, &["init"]);
    let about = init.get_long_about().unwrap().to_string();

    assert!(about.contains("The \"init\" command executes the following phases:"));
    assert!(about.contains("\n  /ca "));
    assert!(about.contains("\nkubeconfig "));
    assert!(!about.contains("wait-control-plane"), "hidden phases are not listed");
    assert!(!about.contains("/all"), "aggregation phases are not listed");
}

#[test]
fn test_phase_sub_commands_mirror_the_tree() {
    let harness = Harness::new(DryRunCluster::new());
    let root = harness.app().command();

    let certs = find(&root, &["init", "phase", "certs"]);
    let names: Vec<&str> = certs.get_subcommands().map(|c| c.get_name()).collect();
    assert_eq!(names.first(), Some(&"all"));
    assert!(names.contains(&"etcd-server"));
    assert!(names.contains(&"sa"));

    assert!(find(&root, &["init", "phase"]).find_subcommand("wait-control-plane").is_none());
    assert!(find(&root, &["join", "phase"]).find_subcommand("check-etcd").is_none());
    assert!(find(&root, &["reset", "phase"]).find_subcommand("pre-flight").is_some());
}

#[test]
fn test_phase_sub_commands_inherit_only_listed_flags() {
    let harness = Harness::new(DryRunCluster::new());
    let root = harness.app().command();

    let ca = arg_ids(find(&root, &["init", "phase", "certs", "ca"]));
    assert!(ca.contains(&"cert-dir".to_string()));
    assert!(!ca.contains(&"apiserver-advertise-address".to_string()));
    assert!(!ca.contains(&"dry-run".to_string()));

    let admin = arg_ids(find(&root, &["init", "phase", "kubeconfig", "admin"]));
    assert!(admin.contains(&"kubeconfig-dir".to_string()), "additional flags are inheritable");
    assert!(!arg_ids(find(&root, &["init"])).contains(&"kubeconfig-dir".to_string()));

    let kubelet_start = find(&root, &["join", "phase", "kubelet-start"]);
    let positionals: Vec<String> = kubelet_start
        .get_positionals()
        .map(|arg| arg.get_id().to_string())
        .collect();
    assert_eq!(positionals, vec!["api-server-endpoint"]);
}

#[test]
fn test_phase_group_invocation_prints_help_without_running() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["init", "phase", "certs"]).unwrap();

    assert!(harness.text().contains("Generate the self-signed Kubernetes CA"));
    assert!(harness.cluster.operations().is_empty());
}

#[test]
fn test_single_leaf_phase_runs_alone() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["init", "phase", "certs", "ca"]).unwrap();

    assert_eq!(harness.cluster.operations(), vec!["create-ca ca"]);
    assert!(harness.root().join("pki/ca.crt").is_file());
    assert!(harness.text().contains("[certs] Generating \"ca\" certificate and key"));
}

#[test]
fn test_aggregation_leaf_runs_every_sibling() {
    let harness = Harness::new(DryRunCluster::new());
    harness.run(&["init", "phase", "kubeconfig", "all"]).unwrap();

    let written: Vec<String> = harness
        .cluster
        .operations()
        .into_iter()
        .filter(|op| op.starts_with("write-kubeconfig"))
        .collect();
    assert_eq!(
        written,
        vec![
            "write-kubeconfig admin.conf",
            "write-kubeconfig kubelet.conf",
            "write-kubeconfig controller-manager.conf",
            "write-kubeconfig scheduler.conf",
        ]
    );
}

#[test]
fn test_inherited_flag_reaches_the_run_context() {
    let harness = Harness::new(DryRunCluster::new());
    let target = harness.root().join("custom-kubeconfigs");
    let target_arg = target.display().to_string();
    harness
        .run(&["init", "phase", "kubeconfig", "admin", "--kubeconfig-dir", &target_arg])
        .unwrap();

    assert!(target.join("admin.conf").is_file());
    assert!(!harness.root().join("admin.conf").exists());
}

#[test]
fn test_unknown_skip_phase_is_rejected_before_running() {
    let harness = Harness::new(DryRunCluster::new());
    let err = harness
        .run(&["init", "--skip-phases", "certs/zzz"])
        .unwrap_err();

    assert!(matches!(
        err,
        CommandError::Workflow(WorkflowError::UnknownPhase(ref name)) if name == "certs/zzz"
    ));
    assert!(harness.cluster.operations().is_empty());
}
