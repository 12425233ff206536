//! Integration tests for configuration precedence as seen by the phases:
//! global file, then `--config`, then the environment, then flags.

use crate::integration::test_utils::with_xdg_env;
use kubeboot::cli::{App, CommandEnv};
use kubeboot::cluster::{Collaborators, DryRunCluster, CONTAINERD_SOCKET};
use kubeboot::config::ConfigLoader;
use kubeboot::phases::Console;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_global(contents: &str) {
    let path = ConfigLoader::global_config_path().unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A config file that only sets what the phases need to stay inside `root`.
fn write_local(root: &Path, extra: &str) -> PathBuf {
    let path = root.join("kubeboot.toml");
    let contents = format!(
        r#"
[node]
cri_socket = "{socket}"
ignore_preflight_errors = ["all"]
{extra}

[paths]
kubernetes_dir = "{root}"
manifests_dir = "{root}/manifests"
kubelet_dir = "{root}/kubelet"

[cluster]
certificates_dir = "{root}/pki"
"#,
        socket = CONTAINERD_SOCKET,
        extra = extra,
        root = root.display()
    );
    fs::write(&path, contents).unwrap();
    path
}

fn run(cluster: &DryRunCluster, root: &Path, env: &[(&str, &str)], args: &[&str]) {
    let (console, _) = Console::buffered("");
    let env = CommandEnv {
        collaborators: Collaborators::recording(cluster.clone()),
        console,
        include_global_config: true,
        env_overrides: Some(
            env.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        ),
        scratch_dir: root.join("scratch"),
    };
    let argv = std::iter::once("kubeboot").chain(args.iter().copied());
    App::new(env).run(argv).unwrap();
}

fn marked_node(cluster: &DryRunCluster) -> String {
    cluster
        .operations()
        .iter()
        .find_map(|op| op.strip_prefix("mark-control-plane "))
        .and_then(|rest| rest.split(' ').next())
        .unwrap()
        .to_string()
}

fn pulled_apiserver(cluster: &DryRunCluster) -> String {
    cluster
        .operations()
        .iter()
        .find_map(|op| op.strip_prefix("pull-image k8s.gcr.io/kube-apiserver:"))
        .unwrap()
        .to_string()
}

#[test]
fn test_global_file_is_the_lowest_file_layer() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global(
            "[cluster]\nkubernetes_version = \"v1.21.3\"\n\n[node]\nname = \"global-node\"\n",
        );
        let root = test_dir.path().join("host");
        fs::create_dir_all(&root).unwrap();
        let config = write_local(&root, "name = \"file-node\"");
        let config = config.display().to_string();

        let cluster = DryRunCluster::new();
        run(&cluster, &root, &[], &["init", "phase", "preflight", "--config", &config]);
        assert_eq!(pulled_apiserver(&cluster), "v1.21.3");

        let cluster = DryRunCluster::new();
        run(&cluster, &root, &[], &["init", "phase", "mark-control-plane", "--config", &config]);
        assert_eq!(marked_node(&cluster), "file-node");
    });
}

#[test]
fn test_environment_overrides_files_and_flags_override_everything() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        write_global("[cluster]\nkubernetes_version = \"v1.21.3\"\n");
        let root = test_dir.path().join("host");
        fs::create_dir_all(&root).unwrap();
        let config = write_local(&root, "name = \"file-node\"");
        let config = config.display().to_string();
        let env = [
            ("KUBEBOOT__CLUSTER__KUBERNETES_VERSION", "v1.23.1"),
            ("KUBEBOOT__NODE__NAME", "env-node"),
        ];

        let cluster = DryRunCluster::new();
        run(&cluster, &root, &env, &["init", "phase", "preflight", "--config", &config]);
        assert_eq!(pulled_apiserver(&cluster), "v1.23.1");

        let cluster = DryRunCluster::new();
        run(&cluster, &root, &env, &["init", "phase", "mark-control-plane", "--config", &config]);
        assert_eq!(marked_node(&cluster), "env-node");

        let cluster = DryRunCluster::new();
        run(
            &cluster,
            &root,
            &env,
            &[
                "init",
                "phase",
                "mark-control-plane",
                "--config",
                &config,
                "--node-name",
                "flag-node",
            ],
        );
        assert_eq!(marked_node(&cluster), "flag-node");
    });
}
