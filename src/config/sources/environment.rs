//! Environment source: `KUBEBOOT__SECTION__KEY=value`.
//!
//! List-valued keys take comma separated values, e.g.
//! `KUBEBOOT__NODE__IGNORE_PREFLIGHT_ERRORS=swap,numcpu`.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;
use std::collections::HashMap;

pub const ENV_PREFIX: &str = "KUBEBOOT";

const LIST_KEYS: &[&str] = &[
    "cluster.cert_sans",
    "cluster.etcd.external_endpoints",
    "node.ignore_preflight_errors",
    "node.taints",
    "init.skip_phases",
    "init.bootstrap_tokens",
    "join.skip_phases",
];

/// Add the environment source. `overrides` replaces the process
/// environment when given.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    overrides: Option<HashMap<String, String>>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let mut environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }
    Ok(builder.add_source(environment.source(overrides)))
}
