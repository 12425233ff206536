//! Error types for the kubeboot workflow engine and command layer.

use thiserror::Error;

/// Errors surfaced by the phase runner.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid phase name: {0}")]
    UnknownPhase(String),

    #[error("phase marked as RunAllSiblings can not have Run functions {0}")]
    InvalidPhaseConfiguration(String),

    #[error("error execution run condition for phase {phase}: {source:#}")]
    ConditionEvaluation {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error execution phase {phase}: {source:#}")]
    Action {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to initialize run data: {0:#}")]
    ContextInitialization(#[source] anyhow::Error),
}

impl WorkflowError {
    /// Name of the phase the error is attributed to, if any.
    pub fn phase(&self) -> Option<&str> {
        match self {
            WorkflowError::UnknownPhase(name) | WorkflowError::InvalidPhaseConfiguration(name) => {
                Some(name)
            }
            WorkflowError::ConditionEvaluation { phase, .. }
            | WorkflowError::Action { phase, .. } => Some(phase),
            WorkflowError::ContextInitialization(_) => None,
        }
    }

    /// The opaque error returned by a phase action, condition or data initializer.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            WorkflowError::ConditionEvaluation { source, .. }
            | WorkflowError::Action { source, .. }
            | WorkflowError::ContextInitialization(source) => Some(source),
            _ => None,
        }
    }
}

/// Failure of a preflight check. Phases return it through `anyhow` so the
/// command layer can map it to its dedicated exit code.
#[derive(Debug, Error)]
#[error("[preflight] Some fatal errors occurred:\n{}", format_err_msg(.0))]
pub struct PreflightError(pub Vec<String>);

/// Process exit code for errors without a more specific category.
pub const DEFAULT_ERROR_EXIT_CODE: i32 = 1;
/// Process exit code for failed preflight checks.
pub const PREFLIGHT_EXIT_CODE: i32 = 2;
/// Process exit code for aggregated validation failures.
pub const VALIDATION_EXIT_CODE: i32 = 3;

/// Errors at the command-line boundary.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}", format_err_msg(.0))]
    Validation(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Clap(#[from] clap::Error),
}

impl CommandError {
    /// Exit code the process should terminate with for this error.
    ///
    /// Errors raised inside phases or the run data initializer are looked up
    /// through the wrapped cause chain.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Preflight(_) => PREFLIGHT_EXIT_CODE,
            CommandError::Validation(_) => VALIDATION_EXIT_CODE,
            CommandError::Workflow(err) => err
                .cause()
                .map(cause_exit_code)
                .unwrap_or(DEFAULT_ERROR_EXIT_CODE),
            _ => DEFAULT_ERROR_EXIT_CODE,
        }
    }
}

fn cause_exit_code(cause: &anyhow::Error) -> i32 {
    for err in cause.chain() {
        if err.is::<PreflightError>() {
            return PREFLIGHT_EXIT_CODE;
        }
        if let Some(CommandError::Validation(_)) = err.downcast_ref::<CommandError>() {
            return VALIDATION_EXIT_CODE;
        }
    }
    DEFAULT_ERROR_EXIT_CODE
}

impl From<config::ConfigError> for CommandError {
    fn from(err: config::ConfigError) -> Self {
        CommandError::Config(err.to_string())
    }
}

/// One line per message, tab indented and dash prefixed.
pub fn format_err_msg(errs: &[String]) -> String {
    errs.iter().map(|e| format!("\t- {}\n", e)).collect()
}
