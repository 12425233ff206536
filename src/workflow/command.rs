//! Projection of a runner's phase tree onto the command line.
//!
//! `bind_to_command` adds a `phase` sub-command with one nested sub-command
//! per visible phase, and `dispatch` turns the resulting matches back into a
//! filtered run.

use crate::error::WorkflowError;
use crate::workflow::node::{children_of, flatten, position, PhaseNode, PHASE_SEPARATOR};
use crate::workflow::runner::Runner;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::HashSet;
use tracing::debug;

/// Name of the sub-command holding the per-phase commands.
pub const PHASE_COMMAND: &str = "phase";

/// Flag id populating `RunnerOptions::skip_phases`.
pub const SKIP_PHASES_FLAG: &str = "skip-phases";

const HELP_OFFSET: usize = 2;

/// What `dispatch` did with the matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No phase was selected; the caller runs the whole workflow.
    Workflow,
    /// The selected phase (or aggregation parent) ran.
    Phase(String),
    /// A phase group was selected; this is its rendered help.
    Help(String),
}

impl<D> Runner<D> {
    /// Register flags that phase sub-commands may inherit in addition to
    /// the parent command's own flags.
    pub fn set_additional_flags(&mut self, flags: Vec<Arg>) {
        self.additional_flags = flags;
    }

    /// Render the list of phases executed by the workflow.
    pub fn help(&self, cmd_use: &str) -> String {
        let nodes = flatten(&self.phases);
        let max_len = nodes
            .iter()
            .filter(|node| node.is_listed())
            .map(|node| node.use_name.len())
            .max()
            .unwrap_or(0);

        let mut out = format!("The {:?} command executes the following phases:\n", cmd_use);
        out.push_str("```\n");
        for node in nodes.iter().filter(|node| node.is_listed()) {
            out.push_str(&" ".repeat(HELP_OFFSET * node.level));
            out.push_str(&node.use_name);
            out.push_str(&" ".repeat(max_len - node.use_name.len() + HELP_OFFSET));
            out.push_str(&node.phase.short);
            out.push('\n');
        }
        out.push_str("```");
        out
    }

    /// Attach the `phase` sub-command tree and `--skip-phases` to `cmd`.
    ///
    /// Returns `cmd` unchanged when the runner has no phases.
    pub fn bind_to_command(&mut self, cmd: Command) -> Command {
        if self.phases.is_empty() {
            return cmd;
        }

        let cmd_name = cmd.get_name().to_string();
        let parent_flags: Vec<Arg> = cmd
            .get_arguments()
            .filter(|arg| !arg.is_positional() && !arg.is_global_set())
            .cloned()
            .collect();
        let parent_positionals: Vec<Arg> = cmd.get_positionals().cloned().collect();

        let nodes = flatten(&self.phases);
        let projection = Projection {
            nodes: &nodes,
            parent_flags: &parent_flags,
            additional_flags: &self.additional_flags,
            parent_positionals: &parent_positionals,
        };

        let mut phase_cmd = Command::new(PHASE_COMMAND).about(format!(
            "Use this command to invoke single phase of the {} workflow",
            cmd_name
        ));
        for (index, node) in nodes.iter().enumerate() {
            if node.parent.is_none() && !node.phase.hidden {
                phase_cmd = phase_cmd.subcommand(projection.build(index));
            }
        }

        let help = self.help(&cmd_name);
        let intro = cmd
            .get_long_about()
            .or_else(|| cmd.get_about())
            .map(|text| text.to_string())
            .unwrap_or_default();
        self.phase_command = Some(phase_cmd.clone());
        debug!(command = %cmd_name, phases = nodes.len(), "phase sub-commands bound");

        cmd.long_about(format!("{}\n\n{}\n", intro, help))
            .subcommand(phase_cmd)
            .arg(
                Arg::new(SKIP_PHASES_FLAG)
                    .long(SKIP_PHASES_FLAG)
                    .value_name("PHASES")
                    .value_delimiter(',')
                    .action(ArgAction::Append)
                    .help("List of phases to be skipped"),
            )
    }

    /// Act on the matches of the bound workflow command.
    ///
    /// `--skip-phases` always lands in the options. A bare workflow
    /// invocation returns [`Dispatch::Workflow`] without running anything.
    /// `phase <name> [<sub> ...]` narrows the filter to the selected phase
    /// and runs it, except for phase groups whose help is returned instead.
    pub fn dispatch(&mut self, matches: &ArgMatches) -> Result<Dispatch, WorkflowError> {
        if let Some(skips) = string_values(matches, SKIP_PHASES_FLAG) {
            self.options.skip_phases = skips;
        }

        let phase_matches = match matches.subcommand() {
            Some((PHASE_COMMAND, sub)) => sub,
            _ => {
                self.run_matches = Some(matches.clone());
                return Ok(Dispatch::Workflow);
            }
        };
        let Some(phase_root) = self.phase_command.as_ref() else {
            self.run_matches = Some(matches.clone());
            return Ok(Dispatch::Workflow);
        };

        let mut command = phase_root;
        let mut current = phase_matches;
        let mut path = Vec::new();
        while let Some((name, sub)) = current.subcommand() {
            command = command
                .find_subcommand(name)
                .ok_or_else(|| WorkflowError::UnknownPhase(name.to_string()))?;
            path.push(name.to_string());
            current = sub;
        }

        if path.is_empty() {
            return Ok(Dispatch::Help(render_help(command)));
        }

        let generated_name = path.join(PHASE_SEPARATOR);
        let nodes = flatten(&self.phases);
        let index = position(&nodes, &generated_name)
            .ok_or_else(|| WorkflowError::UnknownPhase(generated_name.clone()))?;
        let node = &nodes[index];

        if !node.is_leaf() {
            return Ok(Dispatch::Help(render_help(command)));
        }

        let selector = match node.parent {
            Some(parent) if node.phase.run_all_siblings => nodes[parent].generated_name.clone(),
            _ => generated_name,
        };
        let args: Vec<String> = command
            .get_positionals()
            .filter_map(|arg| string_values(current, arg.get_id().as_str()))
            .flatten()
            .collect();
        let run_matches = current.clone();
        drop(nodes);

        debug!(phase = %selector, "running single phase");
        self.options.filter_phases = vec![selector.clone()];
        self.run_matches = Some(run_matches);
        self.run(&args)?;
        Ok(Dispatch::Phase(selector))
    }
}

struct Projection<'n, 'a, D> {
    nodes: &'n [PhaseNode<'a, D>],
    parent_flags: &'n [Arg],
    additional_flags: &'n [Arg],
    parent_positionals: &'n [Arg],
}

impl<'n, 'a, D> Projection<'n, 'a, D> {
    fn build(&self, index: usize) -> Command {
        let node = &self.nodes[index];
        let phase = node.phase;
        let name = node.path.last().cloned().unwrap_or_default();

        let mut cmd = Command::new(name)
            .about(phase.short.clone())
            .visible_aliases(phase.aliases.clone());
        if !phase.long.is_empty() {
            cmd = cmd.long_about(phase.long.clone());
        }
        if !phase.example.is_empty() {
            cmd = cmd.after_help(format!("Examples:\n{}", phase.example));
        }

        let mut seen = HashSet::new();
        for arg in self.parent_flags.iter().chain(self.additional_flags) {
            let id = arg.get_id().as_str();
            if phase.inherit_flags.iter().any(|wanted| wanted == id) && seen.insert(id.to_string()) {
                cmd = cmd.arg(arg.clone());
            }
        }
        for arg in &phase.local_flags {
            cmd = cmd.arg(arg.clone());
        }

        if node.is_leaf() {
            let positionals = phase.args.as_deref().unwrap_or(self.parent_positionals);
            for arg in positionals {
                cmd = cmd.arg(arg.clone());
            }
        }

        for child in children_of(self.nodes, index) {
            if !self.nodes[child].phase.hidden {
                cmd = cmd.subcommand(self.build(child));
            }
        }
        cmd
    }
}

fn render_help(command: &Command) -> String {
    command.clone().render_long_help().to_string()
}

fn string_values(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
}
