//! CLI output: error mapping from command errors to the stable CLI surface.

use crate::error::{CommandError, PREFLIGHT_EXIT_CODE};

const PREFLIGHT_HINT: &str = "[preflight] If you know what you are doing, you can make a check non-fatal with `--ignore-preflight-errors=...`";

/// Map a command error to the text printed on stderr.
pub fn map_error(e: &CommandError) -> String {
    match e {
        CommandError::Clap(err) => err.render().to_string(),
        _ if e.exit_code() == PREFLIGHT_EXIT_CODE => {
            format!("{}\n{}", e.to_string().trim_end(), PREFLIGHT_HINT)
        }
        _ => e.to_string(),
    }
}
