//! Flag names shared by the workflow commands and the phases inheriting
//! them, plus typed lookups that tolerate flags a phase sub-command lacks.

use crate::config::KubebootConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches};
use std::path::PathBuf;

pub const CFG_PATH: &str = "config";
pub const CERTIFICATES_DIR: &str = "cert-dir";
pub const KUBECONFIG_DIR: &str = "kubeconfig-dir";
pub const KUBERNETES_VERSION: &str = "kubernetes-version";
pub const APISERVER_ADVERTISE_ADDRESS: &str = "apiserver-advertise-address";
pub const APISERVER_BIND_PORT: &str = "apiserver-bind-port";
pub const APISERVER_CERT_SANS: &str = "apiserver-cert-extra-sans";
pub const CONTROL_PLANE_ENDPOINT: &str = "control-plane-endpoint";
pub const NETWORKING_DNS_DOMAIN: &str = "service-dns-domain";
pub const NETWORKING_SERVICE_SUBNET: &str = "service-cidr";
pub const NETWORKING_POD_SUBNET: &str = "pod-network-cidr";
pub const NODE_NAME: &str = "node-name";
pub const NODE_CRI_SOCKET: &str = "cri-socket";
pub const IGNORE_PREFLIGHT_ERRORS: &str = "ignore-preflight-errors";
pub const DRY_RUN: &str = "dry-run";
pub const UPLOAD_CERTS: &str = "upload-certs";
pub const CERTIFICATE_KEY: &str = "certificate-key";
pub const SKIP_CERTIFICATE_KEY_PRINT: &str = "skip-certificate-key-print";
pub const SKIP_TOKEN_PRINT: &str = "skip-token-print";
pub const TOKEN_STR: &str = "token";
pub const TLS_BOOTSTRAP_TOKEN: &str = "tls-bootstrap-token";
pub const CONTROL_PLANE: &str = "control-plane";
pub const FORCE_RESET: &str = "force";
pub const API_SERVER_ENDPOINT: &str = "api-server-endpoint";

pub fn string_flag(id: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(id).long(id).value_name(value_name).help(help)
}

pub fn bool_flag(id: &'static str, help: &'static str) -> Arg {
    Arg::new(id).long(id).action(ArgAction::SetTrue).help(help)
}

/// Comma separated, repeatable.
pub fn list_flag(id: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    string_flag(id, value_name, help)
        .value_delimiter(',')
        .action(ArgAction::Append)
}

pub fn cert_dir_flag() -> Arg {
    string_flag(
        CERTIFICATES_DIR,
        "DIR",
        "The path where to save and store the certificates.",
    )
}

pub fn node_name_flag() -> Arg {
    string_flag(NODE_NAME, "NAME", "Specify the node name.")
}

pub fn cri_socket_flag() -> Arg {
    string_flag(
        NODE_CRI_SOCKET,
        "PATH",
        "Path to the CRI socket to connect. If empty kubeboot will try to auto-detect this value; \
         use this option only if you have more than one CRI installed or if you have non-standard CRI socket.",
    )
}

pub fn ignore_preflight_errors_flag() -> Arg {
    list_flag(
        IGNORE_PREFLIGHT_ERRORS,
        "CHECKS",
        "A list of checks whose errors will be shown as warnings. Example: 'IsPrivilegedUser,Swap'. \
         Value 'all' ignores errors from all checks.",
    )
}

pub fn advertise_address_flag() -> Arg {
    string_flag(
        APISERVER_ADVERTISE_ADDRESS,
        "ADDRESS",
        "The IP address the API Server will advertise it's listening on.",
    )
}

pub fn bind_port_flag() -> Arg {
    string_flag(
        APISERVER_BIND_PORT,
        "PORT",
        "Port for the API Server to bind to.",
    )
    .value_parser(value_parser!(u16))
}

pub fn certificate_key_flag() -> Arg {
    string_flag(
        CERTIFICATE_KEY,
        "KEY",
        "Key used to encrypt the control-plane certificates in the kubeboot-certs Secret.",
    )
}

pub fn token_flag(help: &'static str) -> Arg {
    string_flag(TOKEN_STR, "TOKEN", help)
}

pub fn get_string(matches: Option<&ArgMatches>, id: &str) -> Option<String> {
    matches?.try_get_one::<String>(id).ok().flatten().cloned()
}

pub fn get_strings(matches: Option<&ArgMatches>, id: &str) -> Vec<String> {
    matches
        .and_then(|m| m.try_get_many::<String>(id).ok().flatten())
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

pub fn get_flag(matches: Option<&ArgMatches>, id: &str) -> bool {
    matches
        .and_then(|m| m.try_get_one::<bool>(id).ok().flatten().copied())
        .unwrap_or(false)
}

pub fn get_u16(matches: Option<&ArgMatches>, id: &str) -> Option<u16> {
    matches?.try_get_one::<u16>(id).ok().flatten().copied()
}

pub fn get_path(matches: Option<&ArgMatches>, id: &str) -> Option<PathBuf> {
    matches?.try_get_one::<PathBuf>(id).ok().flatten().cloned()
}

/// `--node-name` and `--cri-socket`.
pub fn apply_node_flags(cfg: &mut KubebootConfig, matches: Option<&ArgMatches>) {
    if let Some(name) = get_string(matches, NODE_NAME) {
        cfg.node.name = name;
    }
    if let Some(socket) = get_string(matches, NODE_CRI_SOCKET) {
        cfg.node.cri_socket = socket;
    }
}

/// `--apiserver-advertise-address` and `--apiserver-bind-port`.
pub fn apply_api_endpoint_flags(cfg: &mut KubebootConfig, matches: Option<&ArgMatches>) {
    if let Some(address) = get_string(matches, APISERVER_ADVERTISE_ADDRESS) {
        cfg.api_endpoint.advertise_address = address;
    }
    if let Some(port) = get_u16(matches, APISERVER_BIND_PORT) {
        cfg.api_endpoint.bind_port = port;
    }
}
