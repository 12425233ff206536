//! Workflow runner: executes the flattened phase list against the shared
//! run data, honouring filter/skip options and per-phase run conditions.

use crate::error::WorkflowError;
use crate::workflow::data::RunDataProvider;
use crate::workflow::node::{clean_name, flatten};
use crate::workflow::phase::Phase;
use crate::workflow::run_flags::compute_run_flags;
use clap::{Arg, ArgMatches, Command};
use tracing::{debug, error, info};

/// Options controlling which phases a run executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Phases to run; empty means all.
    pub filter_phases: Vec<String>,
    /// Phases to exclude; empty means none.
    pub skip_phases: Vec<String>,
}

/// Why a phase did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Excluded by the filter or skip options.
    Options,
    /// Its run condition returned false.
    Condition,
}

/// Terminal state of a visited phase in the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Skipped(SkipReason),
    Completed,
    Failed,
}

/// Runner for one composable workflow.
pub struct Runner<D> {
    pub options: RunnerOptions,
    pub phases: Vec<Phase<D>>,
    pub(crate) data: RunDataProvider<D>,
    /// Matches of the command that triggered the runner, if bound to one.
    pub(crate) run_matches: Option<ArgMatches>,
    pub(crate) additional_flags: Vec<Arg>,
    /// The `phase` sub-command tree generated by the last `bind_to_command`.
    pub(crate) phase_command: Option<Command>,
    outcomes: Vec<(String, PhaseOutcome)>,
}

impl<D> Runner<D> {
    pub fn new() -> Self {
        Self {
            options: RunnerOptions::default(),
            phases: Vec::new(),
            data: RunDataProvider::new(),
            run_matches: None,
            additional_flags: Vec::new(),
            phase_command: None,
            outcomes: Vec::new(),
        }
    }

    pub fn append_phase(&mut self, phase: Phase<D>) {
        self.phases.push(phase);
    }

    /// Register the factory for the run data shared by all phases.
    pub fn set_data_initializer<F>(&mut self, initializer: F)
    where
        F: Fn(Option<&ArgMatches>, &[String]) -> anyhow::Result<D> + 'static,
    {
        self.data.set_initializer(initializer);
    }

    /// Build the run data if it does not exist yet and return it.
    ///
    /// Use this to inspect the data before `run`; `run` reuses the same
    /// instance.
    pub fn init_data(&mut self, args: &[String]) -> Result<&mut D, WorkflowError> {
        self.data.get_or_create(self.run_matches.as_ref(), args)
    }

    pub fn data(&self) -> Option<&D> {
        self.data.get()
    }

    /// Hand the run data over to the caller, e.g. for post-run cleanup.
    pub fn take_data(&mut self) -> Option<D> {
        self.data.take()
    }

    pub fn into_data(mut self) -> Option<D> {
        self.data.take()
    }

    /// Per-phase outcomes of the most recent `run`, in visiting order.
    pub fn outcomes(&self) -> &[(String, PhaseOutcome)] {
        &self.outcomes
    }

    /// Run the workflow.
    ///
    /// Phases run in flattened order. The first failing condition or action
    /// aborts the run; completed phases are not rolled back.
    pub fn run(&mut self, args: &[String]) -> Result<(), WorkflowError> {
        self.outcomes.clear();

        for phase in &self.phases {
            if phase.run_all_siblings && phase.has_action() {
                return Err(WorkflowError::InvalidPhaseConfiguration(clean_name(
                    &phase.name,
                )));
            }
        }

        let nodes = flatten(&self.phases);
        let run_flags = compute_run_flags(&nodes, &self.options)?;
        let data = self.data.get_or_create(self.run_matches.as_ref(), args)?;

        for node in &nodes {
            let name = &node.generated_name;

            if !run_flags.get(name).copied().unwrap_or(false) {
                debug!(phase = %name, "phase excluded by options");
                self.outcomes
                    .push((name.clone(), PhaseOutcome::Skipped(SkipReason::Options)));
                continue;
            }

            if node.phase.run_all_siblings && node.phase.has_action() {
                return Err(WorkflowError::InvalidPhaseConfiguration(name.clone()));
            }

            if let Some(condition) = &node.phase.run_if {
                match condition(&*data) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(phase = %name, "run condition not met, skipping phase");
                        self.outcomes
                            .push((name.clone(), PhaseOutcome::Skipped(SkipReason::Condition)));
                        continue;
                    }
                    Err(source) => {
                        error!(phase = %name, error = %source, "run condition failed");
                        self.outcomes.push((name.clone(), PhaseOutcome::Failed));
                        return Err(WorkflowError::ConditionEvaluation {
                            phase: name.clone(),
                            source,
                        });
                    }
                }
            }

            if let Some(action) = &node.phase.run {
                debug!(phase = %name, "running phase");
                if let Err(source) = action(data) {
                    error!(phase = %name, error = %source, "phase failed");
                    self.outcomes.push((name.clone(), PhaseOutcome::Failed));
                    return Err(WorkflowError::Action {
                        phase: name.clone(),
                        source,
                    });
                }
            }
            self.outcomes.push((name.clone(), PhaseOutcome::Completed));
        }

        info!(phases = nodes.len(), "workflow completed");
        Ok(())
    }
}

impl<D> Default for Runner<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Default)]
    struct Trace {
        calls: Vec<String>,
    }

    fn record(name: &'static str) -> impl Fn(&mut Trace) -> anyhow::Result<()> {
        move |trace: &mut Trace| {
            trace.calls.push(name.to_string());
            Ok(())
        }
    }

    fn runner(phases: Vec<Phase<Trace>>) -> Runner<Trace> {
        let mut runner = Runner::new();
        for phase in phases {
            runner.append_phase(phase);
        }
        runner.set_data_initializer(|_, _| Ok(Trace::default()));
        runner
    }

    fn calls(runner: &Runner<Trace>) -> Vec<String> {
        runner.data().map(|t| t.calls.clone()).unwrap_or_default()
    }

    #[test]
    fn runs_phases_in_pre_order() {
        let mut runner = runner(vec![
            Phase::new("a").run(record("a")).phases(vec![
                Phase::new("b").run(record("b")),
                Phase::new("c").phases(vec![Phase::new("d").run(record("d"))]),
            ]),
            Phase::new("e").run(record("e")),
        ]);
        runner.run(&[]).unwrap();
        assert_eq!(calls(&runner), vec!["a", "b", "d", "e"]);
    }

    #[test]
    fn stops_at_first_failure() {
        let mut runner = runner(vec![
            Phase::new("a").run(record("a")),
            Phase::new("b").run(|trace: &mut Trace| {
                trace.calls.push("b".to_string());
                Err(anyhow!("boom"))
            }),
            Phase::new("c").run(record("c")),
        ]);

        let err = runner.run(&[]).unwrap_err();
        assert!(err.to_string().contains("error execution phase b"));
        assert!(err.to_string().contains("boom"));
        assert_eq!(calls(&runner), vec!["a", "b"]);
        assert_eq!(
            runner.outcomes(),
            &[
                ("a".to_string(), PhaseOutcome::Completed),
                ("b".to_string(), PhaseOutcome::Failed),
            ]
        );
    }

    #[test]
    fn false_condition_skips_only_that_phase() {
        let mut runner = runner(vec![
            Phase::new("a")
                .run_if(|_: &Trace| Ok(false))
                .run(record("a"))
                .phases(vec![Phase::new("child").run(record("child"))]),
            Phase::new("b").run(record("b")),
        ]);
        runner.run(&[]).unwrap();
        assert_eq!(calls(&runner), vec!["child", "b"]);
        assert_eq!(
            runner.outcomes()[0],
            ("a".to_string(), PhaseOutcome::Skipped(SkipReason::Condition))
        );
    }

    #[test]
    fn condition_error_aborts() {
        let mut runner = runner(vec![
            Phase::new("a").run_if(|_: &Trace| Err(anyhow!("cannot tell"))),
            Phase::new("b").run(record("b")),
        ]);
        let err = runner.run(&[]).unwrap_err();
        assert!(matches!(err, WorkflowError::ConditionEvaluation { ref phase, .. } if phase == "a"));
        assert!(calls(&runner).is_empty());
    }

    #[test]
    fn aggregation_phase_with_action_is_rejected() {
        let mut runner = runner(vec![Phase::new("certs").phases(vec![
            Phase::new("ca").run(record("ca")),
            Phase::run_all_siblings("all").run(record("all")),
            Phase::new("sa").run(record("sa")),
        ])]);
        let err = runner.run(&[]).unwrap_err();
        assert!(
            matches!(err, WorkflowError::InvalidPhaseConfiguration(ref name) if name == "certs/all")
        );
        assert_eq!(calls(&runner), vec!["ca"]);
    }

    #[test]
    fn top_level_aggregation_phase_with_action_is_rejected() {
        let mut runner = runner(vec![
            Phase::new("a").run(record("a")),
            Phase::run_all_siblings("all").run_if(|_: &Trace| Ok(true)),
        ]);
        let err = runner.run(&[]).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidPhaseConfiguration(_)));
        assert!(calls(&runner).is_empty());
    }

    #[test]
    fn unknown_filter_runs_nothing() {
        let mut runner = runner(vec![Phase::new("a").run(record("a"))]);
        runner.options.filter_phases = vec!["a/zzz".to_string()];
        let err = runner.run(&[]).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownPhase(_)));
        assert!(calls(&runner).is_empty());
    }

    #[test]
    fn init_data_is_shared_with_run() {
        let mut runner = runner(vec![Phase::new("a").run(record("a"))]);
        runner.init_data(&[]).unwrap().calls.push("banner".to_string());
        runner.run(&[]).unwrap();
        assert_eq!(calls(&runner), vec!["banner", "a"]);
    }

    #[test]
    fn initializer_failure_runs_nothing() {
        let mut runner: Runner<Trace> = Runner::new();
        runner.append_phase(Phase::new("a").run(record("a")));
        runner.set_data_initializer(|_, _| Err(anyhow!("no kubeconfig")));
        let err = runner.run(&[]).unwrap_err();
        assert!(matches!(err, WorkflowError::ContextInitialization(_)));
        assert!(runner.outcomes().is_empty());
    }
}
