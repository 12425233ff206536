//! Concrete workflows
//!
//! Phase trees for `init`, `join` and `reset`. Each tree is generic over a
//! run context implementing the matching capability trait, so the phases
//! only see what they need and tests can supply their own contexts.

use crate::cluster::Collaborators;
use crate::config::{KubebootConfig, PathsConfig};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::rc::Rc;

pub mod init;
pub mod join;
pub mod kubelet;
pub mod preflight;
pub mod reset;
pub mod token;

/// User-facing output and input of one command invocation.
///
/// Progress lines such as `[certs] ...` go here rather than to the log, so
/// they stay readable regardless of the log configuration.
#[derive(Clone)]
pub struct Console {
    out: Rc<RefCell<dyn Write>>,
    input: Rc<RefCell<dyn BufRead>>,
}

impl Console {
    pub fn new(out: impl Write + 'static, input: impl BufRead + 'static) -> Self {
        Self {
            out: Rc::new(RefCell::new(out)),
            input: Rc::new(RefCell::new(input)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdout(), BufReader::new(io::stdin()))
    }

    /// Console reading `input` and capturing everything written.
    pub fn buffered(input: &str) -> (Self, Captured) {
        let captured = Captured::default();
        let console = Self::new(captured.clone(), io::Cursor::new(input.as_bytes().to_vec()));
        (console, captured)
    }

    pub fn println(&self, line: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.out.borrow_mut(), "{}", line.as_ref())
    }

    /// Write without a trailing newline and flush, for prompts.
    pub fn print(&self, text: impl AsRef<str>) -> io::Result<()> {
        let mut out = self.out.borrow_mut();
        write!(out, "{}", text.as_ref())?;
        out.flush()
    }

    /// Read one line, without its line terminator. Empty at end of input.
    pub fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        self.input.borrow_mut().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Shared in-memory sink written by a buffered [`Console`].
#[derive(Clone, Default)]
pub struct Captured(Rc<RefCell<Vec<u8>>>);

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capabilities every workflow context provides.
pub trait HostData {
    fn node_name(&self) -> &str;
    fn cri_socket(&self) -> &str;
    /// Lowercased names of preflight checks whose errors become warnings.
    fn ignore_preflight_errors(&self) -> &BTreeSet<String>;
    fn collaborators(&self) -> &Collaborators;
    fn console(&self) -> &Console;
}

/// Run context of the `init` workflow.
pub trait InitData: HostData {
    fn cfg(&self) -> &KubebootConfig;
    fn dry_run(&self) -> bool;
    /// Directories below are redirected to a scratch directory on dry-run.
    fn cert_dir(&self) -> PathBuf;
    fn kubeconfig_dir(&self) -> PathBuf;
    fn kubelet_dir(&self) -> PathBuf;
    fn manifest_dir(&self) -> PathBuf;
    fn upload_certs(&self) -> bool;
    fn certificate_key(&self) -> &str;
    fn set_certificate_key(&mut self, key: String);
    fn skip_certificate_key_print(&self) -> bool;
    fn skip_token_print(&self) -> bool;
    fn tokens(&self) -> &[String];
}

/// Run context of the `join` workflow.
pub trait JoinData: HostData {
    /// Local join configuration.
    fn cfg(&self) -> &KubebootConfig;
    /// Cluster configuration, fetched from the cluster on first use.
    fn init_cfg(&mut self) -> anyhow::Result<&KubebootConfig>;
    fn api_server_endpoint(&self) -> &str;
    fn tls_bootstrap_token(&self) -> &str;
    fn control_plane(&self) -> bool;
    fn certificate_key(&self) -> &str;
    fn cert_dir(&self) -> PathBuf;
    fn kubeconfig_dir(&self) -> PathBuf;
    fn kubelet_dir(&self) -> PathBuf;
}

/// Run context of the `reset` workflow.
pub trait ResetData: HostData {
    /// Cluster configuration, if it could be fetched.
    fn cfg(&self) -> Option<&KubebootConfig>;
    fn force_reset(&self) -> bool;
    fn cert_dir(&self) -> PathBuf;
    fn paths(&self) -> &PathsConfig;
    fn dirs_to_clean(&self) -> &[PathBuf];
    fn add_dir_to_clean(&mut self, dir: PathBuf);
}

/// `host:port` clients use to reach the API server.
pub fn api_server_address(cfg: &KubebootConfig) -> String {
    let endpoint = cfg.cluster.control_plane_endpoint.trim();
    if !endpoint.is_empty() {
        if endpoint.contains(':') {
            return endpoint.to_string();
        }
        return format!("{}:{}", endpoint, cfg.api_endpoint.bind_port);
    }
    format!("{}:{}", advertise_address(cfg), cfg.api_endpoint.bind_port)
}

pub fn advertise_address(cfg: &KubebootConfig) -> &str {
    if cfg.api_endpoint.advertise_address.is_empty() {
        "127.0.0.1"
    } else {
        &cfg.api_endpoint.advertise_address
    }
}

pub fn api_server_url(cfg: &KubebootConfig) -> String {
    format!("https://{}", api_server_address(cfg))
}
