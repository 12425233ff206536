//! Run data provider: lazily builds the data shared by every phase of one
//! runner and keeps it for the rest of the invocation.

use crate::error::WorkflowError;
use clap::ArgMatches;

/// Factory for the shared run data. Receives the matches of the command
/// that triggered the runner, when there is one, and its positional args.
pub type DataInitializer<D> = Box<dyn Fn(Option<&ArgMatches>, &[String]) -> anyhow::Result<D>>;

pub struct RunDataProvider<D> {
    initializer: Option<DataInitializer<D>>,
    data: Option<D>,
}

impl<D> RunDataProvider<D> {
    pub fn new() -> Self {
        Self {
            initializer: None,
            data: None,
        }
    }

    pub fn set_initializer<F>(&mut self, initializer: F)
    where
        F: Fn(Option<&ArgMatches>, &[String]) -> anyhow::Result<D> + 'static,
    {
        self.initializer = Some(Box::new(initializer));
    }

    /// Return the cached data, building it first if needed.
    ///
    /// Once built, later calls ignore `args`. A failing initializer caches
    /// nothing, so the next call tries again.
    pub fn get_or_create(
        &mut self,
        matches: Option<&ArgMatches>,
        args: &[String],
    ) -> Result<&mut D, WorkflowError> {
        if self.data.is_none() {
            let initializer = self.initializer.as_ref().ok_or_else(|| {
                WorkflowError::ContextInitialization(anyhow::anyhow!(
                    "no run data initializer registered"
                ))
            })?;
            let data = initializer(matches, args).map_err(WorkflowError::ContextInitialization)?;
            tracing::debug!("run data initialized");
            self.data = Some(data);
        }
        self.data
            .as_mut()
            .ok_or_else(|| WorkflowError::ContextInitialization(anyhow::anyhow!("run data missing")))
    }

    pub fn get(&self) -> Option<&D> {
        self.data.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.data.is_some()
    }

    pub fn take(&mut self) -> Option<D> {
        self.data.take()
    }
}

impl<D> Default for RunDataProvider<D> {
    fn default() -> Self {
        Self::new()
    }
}
