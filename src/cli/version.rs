//! `kubeboot version`

use crate::cli::options;
use crate::error::CommandError;
use crate::phases::Console;
use clap::{ArgMatches, Command};
use serde::Serialize;

const OUTPUT: &str = "output";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub git_version: String,
    pub platform: String,
}

impl Info {
    pub fn current() -> Self {
        Self {
            git_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Version {
    client_version: Info,
}

pub fn command() -> Command {
    Command::new("version")
        .about("Print the version of kubeboot")
        .arg(
            options::string_flag(OUTPUT, "FORMAT", "Output format; available options are 'text', 'short' and 'json'")
                .short('o'),
        )
}

/// Render `info` in `format`; empty means `text`.
pub fn render(info: &Info, format: &str) -> Result<String, CommandError> {
    match format {
        "" | "text" => Ok(format!("kubeboot version: {:?}", info)),
        "short" => Ok(info.git_version.clone()),
        "json" => serde_json::to_string_pretty(&Version {
            client_version: info.clone(),
        })
        .map_err(|e| CommandError::Config(format!("unable to encode version: {}", e))),
        other => Err(CommandError::Config(format!("invalid output format: {}", other))),
    }
}

pub fn execute(matches: &ArgMatches, console: &Console) -> Result<(), CommandError> {
    let format = options::get_string(Some(matches), OUTPUT).unwrap_or_default();
    console.println(render(&Info::current(), &format)?)?;
    Ok(())
}
