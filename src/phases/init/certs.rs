//! `certs` phase: the cluster PKI.

use crate::cli::options;
use crate::cluster::{CertRequest, CertificateAuthority};
use crate::config::KubebootConfig;
use crate::phases::{advertise_address, Console, InitData};
use crate::workflow::Phase;
use anyhow::{bail, Result};
use std::path::Path;

/// Subject alternative names a certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltNames {
    None,
    ApiServer,
    Etcd,
}

/// One certificate of the cluster PKI.
#[derive(Debug)]
pub struct CertSpec {
    /// Phase name
    pub name: &'static str,
    pub long_name: &'static str,
    /// Path of the `.crt`/`.key` pair relative to the certificate dir
    pub base_name: &'static str,
    /// `None` uses the node name.
    pub common_name: Option<&'static str>,
    pub organization: &'static [&'static str],
    /// Signing CA, `None` for a CA.
    pub ca: Option<&'static CertSpec>,
    pub alt_names: AltNames,
}

impl CertSpec {
    pub fn is_ca(&self) -> bool {
        self.ca.is_none()
    }

    /// Part of the etcd PKI, which an external etcd brings along.
    pub fn is_etcd(&self) -> bool {
        self.base_name == ETCD_CA.base_name || self.ca.map(|ca| ca.base_name) == Some(ETCD_CA.base_name)
    }
}

pub static CA: CertSpec = CertSpec {
    name: "ca",
    long_name: "self-signed Kubernetes CA to provision identities for other Kubernetes components",
    base_name: "ca",
    common_name: Some("kubernetes"),
    organization: &[],
    ca: None,
    alt_names: AltNames::None,
};

pub static API_SERVER: CertSpec = CertSpec {
    name: "apiserver",
    long_name: "certificate for serving the Kubernetes API",
    base_name: "apiserver",
    common_name: Some("kube-apiserver"),
    organization: &[],
    ca: Some(&CA),
    alt_names: AltNames::ApiServer,
};

pub static API_SERVER_KUBELET_CLIENT: CertSpec = CertSpec {
    name: "apiserver-kubelet-client",
    long_name: "certificate for the API server to connect to kubelet",
    base_name: "apiserver-kubelet-client",
    common_name: Some("kube-apiserver-kubelet-client"),
    organization: &["system:masters"],
    ca: Some(&CA),
    alt_names: AltNames::None,
};

pub static FRONT_PROXY_CA: CertSpec = CertSpec {
    name: "front-proxy-ca",
    long_name: "self-signed CA to provision identities for front proxy",
    base_name: "front-proxy-ca",
    common_name: Some("front-proxy-ca"),
    organization: &[],
    ca: None,
    alt_names: AltNames::None,
};

pub static FRONT_PROXY_CLIENT: CertSpec = CertSpec {
    name: "front-proxy-client",
    long_name: "certificate for the front proxy client",
    base_name: "front-proxy-client",
    common_name: Some("front-proxy-client"),
    organization: &[],
    ca: Some(&FRONT_PROXY_CA),
    alt_names: AltNames::None,
};

pub static ETCD_CA: CertSpec = CertSpec {
    name: "etcd-ca",
    long_name: "self-signed CA to provision identities for etcd",
    base_name: "etcd/ca",
    common_name: Some("etcd-ca"),
    organization: &[],
    ca: None,
    alt_names: AltNames::None,
};

pub static ETCD_SERVER: CertSpec = CertSpec {
    name: "etcd-server",
    long_name: "certificate for serving etcd",
    base_name: "etcd/server",
    common_name: None,
    organization: &[],
    ca: Some(&ETCD_CA),
    alt_names: AltNames::Etcd,
};

pub static ETCD_PEER: CertSpec = CertSpec {
    name: "etcd-peer",
    long_name: "certificate for etcd nodes to communicate with each other",
    base_name: "etcd/peer",
    common_name: None,
    organization: &[],
    ca: Some(&ETCD_CA),
    alt_names: AltNames::Etcd,
};

pub static ETCD_HEALTHCHECK_CLIENT: CertSpec = CertSpec {
    name: "etcd-healthcheck-client",
    long_name: "certificate for liveness probes to healthcheck etcd",
    base_name: "etcd/healthcheck-client",
    common_name: Some("kube-etcd-healthcheck-client"),
    organization: &[],
    ca: Some(&ETCD_CA),
    alt_names: AltNames::None,
};

pub static API_SERVER_ETCD_CLIENT: CertSpec = CertSpec {
    name: "apiserver-etcd-client",
    long_name: "certificate the apiserver uses to access etcd",
    base_name: "apiserver-etcd-client",
    common_name: Some("kube-apiserver-etcd-client"),
    organization: &["system:masters"],
    ca: Some(&ETCD_CA),
    alt_names: AltNames::None,
};

/// Every certificate, each CA directly followed by the certificates it signs.
pub static CERT_LIST: [&CertSpec; 10] = [
    &CA,
    &API_SERVER,
    &API_SERVER_KUBELET_CLIENT,
    &FRONT_PROXY_CA,
    &FRONT_PROXY_CLIENT,
    &ETCD_CA,
    &ETCD_SERVER,
    &ETCD_PEER,
    &ETCD_HEALTHCHECK_CLIENT,
    &API_SERVER_ETCD_CLIENT,
];

/// Subject alternative names of `spec` for a node of `cfg`.
pub fn alt_names(spec: &CertSpec, cfg: &KubebootConfig, node_name: &str) -> Vec<String> {
    let mut sans = Vec::new();
    match spec.alt_names {
        AltNames::None => return sans,
        AltNames::ApiServer => {
            sans.push(node_name.to_string());
            sans.push("kubernetes".to_string());
            sans.push("kubernetes.default".to_string());
            sans.push("kubernetes.default.svc".to_string());
            sans.push(format!("kubernetes.default.svc.{}", cfg.cluster.dns_domain));
            if let Ok((api_ip, _)) = cfg.cluster.service_addresses() {
                sans.push(api_ip.to_string());
            }
            sans.push(advertise_address(cfg).to_string());
            let endpoint = cfg.cluster.control_plane_endpoint.trim();
            if !endpoint.is_empty() {
                let host = endpoint.rsplit_once(':').map_or(endpoint, |(host, _)| host);
                sans.push(host.to_string());
            }
            sans.extend(cfg.cluster.cert_sans.iter().cloned());
        }
        AltNames::Etcd => {
            sans.push(node_name.to_string());
            sans.push("localhost".to_string());
            sans.push(advertise_address(cfg).to_string());
            sans.push("127.0.0.1".to_string());
            sans.push("::1".to_string());
        }
    }
    sans.retain(|s| !s.is_empty());
    let mut seen = std::collections::HashSet::new();
    sans.retain(|s| seen.insert(s.clone()));
    sans
}

fn pair_exists(cert_dir: &Path, base_name: &str) -> (bool, bool) {
    (
        cert_dir.join(format!("{}.crt", base_name)).is_file(),
        cert_dir.join(format!("{}.key", base_name)).is_file(),
    )
}

/// Create a CA unless one is already on disk.
pub fn ensure_ca(
    console: &Console,
    certs: &dyn CertificateAuthority,
    spec: &CertSpec,
    cert_dir: &Path,
) -> Result<()> {
    match pair_exists(cert_dir, spec.base_name) {
        (true, true) => {
            console.println(format!(
                "[certs] Using existing {} certificate authority",
                spec.base_name
            ))?;
        }
        (true, false) => {
            console.println(format!(
                "[certs] Using existing {} keyless certificate authority",
                spec.base_name
            ))?;
        }
        _ => {
            console.println(format!(
                "[certs] Generating {:?} certificate and key",
                spec.base_name
            ))?;
            certs.create_ca(cert_dir, spec.base_name, spec.common_name.unwrap_or(spec.name))?;
        }
    }
    Ok(())
}

/// Create a signed certificate unless one is already on disk. Its CA must
/// be on disk either way.
pub fn ensure_cert(
    console: &Console,
    certs: &dyn CertificateAuthority,
    spec: &CertSpec,
    cfg: &KubebootConfig,
    node_name: &str,
    cert_dir: &Path,
) -> Result<()> {
    let Some(ca) = spec.ca else {
        return ensure_ca(console, certs, spec, cert_dir);
    };

    if pair_exists(cert_dir, spec.base_name).0 {
        if !pair_exists(cert_dir, ca.base_name).0 {
            bail!("couldn't load CA certificate {}", ca.name);
        }
        console.println(format!(
            "[certs] Using existing {} certificate and key on disk",
            spec.base_name
        ))?;
        return Ok(());
    }

    let (ca_cert, ca_key) = pair_exists(cert_dir, ca.base_name);
    if !ca_cert {
        bail!("couldn't load CA certificate {}", ca.name);
    }
    if !ca_key {
        bail!(
            "couldn't load CA private key {}: the certificate {} must be provided",
            ca.name,
            spec.base_name
        );
    }

    let sans = alt_names(spec, cfg, node_name);
    console.println(format!(
        "[certs] Generating {:?} certificate and key",
        spec.base_name
    ))?;
    if !sans.is_empty() {
        console.println(format!(
            "[certs] {} serving cert is signed for DNS names and IPs [{}]",
            spec.name,
            sans.join(" ")
        ))?;
    }
    let request = CertRequest {
        base_name: spec.base_name.to_string(),
        common_name: spec.common_name.unwrap_or(node_name).to_string(),
        organization: spec.organization.iter().map(|o| o.to_string()).collect(),
        sans,
        ca_base_name: ca.base_name.to_string(),
    };
    certs.create_signed_cert(cert_dir, &request)
}

/// Create the service account key pair unless it is already on disk.
pub fn ensure_sa_keys(console: &Console, certs: &dyn CertificateAuthority, cert_dir: &Path) -> Result<()> {
    if cert_dir.join("sa.key").is_file() {
        console.println("[certs] Using the existing \"sa\" key")?;
        return Ok(());
    }
    console.println("[certs] Generating \"sa\" key and public key")?;
    certs.create_service_account_keys(cert_dir)
}

fn cert_phase_flags(name: &str) -> Vec<&'static str> {
    let mut flags = vec![
        options::CERTIFICATES_DIR,
        options::CFG_PATH,
        options::KUBERNETES_VERSION,
    ];
    if name == "all" || name == "apiserver" {
        flags.extend([
            options::APISERVER_ADVERTISE_ADDRESS,
            options::CONTROL_PLANE_ENDPOINT,
            options::APISERVER_CERT_SANS,
            options::NETWORKING_DNS_DOMAIN,
            options::NETWORKING_SERVICE_SUBNET,
        ]);
    }
    flags
}

fn run_cert<D: InitData>(spec: &'static CertSpec, data: &mut D) -> Result<()> {
    let console = data.console();
    if data.cfg().cluster.etcd.is_external() && spec.is_etcd() {
        if spec.is_ca() {
            console.println(format!(
                "[certs] External etcd mode: Skipping {} certificate authority generation",
                spec.base_name
            ))?;
        } else {
            console.println(format!(
                "[certs] External etcd mode: Skipping {} certificate generation",
                spec.base_name
            ))?;
        }
        return Ok(());
    }
    ensure_cert(
        console,
        data.collaborators().certs.as_ref(),
        spec,
        data.cfg(),
        data.node_name(),
        &data.cert_dir(),
    )
}

fn cert_sub_phase<D: InitData + 'static>(spec: &'static CertSpec) -> Phase<D> {
    Phase::new(spec.name)
        .short(format!("Generate the {}", spec.long_name))
        .long(format!(
            "Generate the {}, and save them into {}.crt and {}.key files.\n\n\
             If both files already exist, kubeboot skips the generation step and existing files will be used.",
            spec.long_name, spec.base_name, spec.base_name
        ))
        .inherit_flags(cert_phase_flags(spec.name))
        .run(move |data: &mut D| run_cert(spec, data))
}

pub fn new_certs_phase<D: InitData + 'static>() -> Phase<D> {
    let mut sub_phases = vec![Phase::run_all_siblings("all")
        .short("Generate all certificates")
        .inherit_flags(cert_phase_flags("all"))];
    for spec in CERT_LIST {
        sub_phases.push(cert_sub_phase(spec));
    }
    sub_phases.push(
        Phase::new("sa")
            .short("Generate a private key for signing service account tokens along with its public key")
            .long(
                "Generate the private key for signing service account tokens along with its public key, \
                 and save them into sa.key and sa.pub files.",
            )
            .inherit_flags([options::CERTIFICATES_DIR])
            .run(|data: &mut D| {
                ensure_sa_keys(
                    data.console(),
                    data.collaborators().certs.as_ref(),
                    &data.cert_dir(),
                )
            }),
    );

    Phase::new("certs")
        .short("Certificate generation")
        .phases(sub_phases)
        .run(|data: &mut D| {
            data.console().println(format!(
                "[certs] Using certificateDir folder {:?}",
                data.cert_dir().display().to_string()
            ))?;
            Ok(())
        })
}
