//! Phase descriptor: one named unit of work in a workflow.

use clap::Arg;

/// Action executed by a phase against the shared run data.
pub type PhaseAction<D> = Box<dyn Fn(&mut D) -> anyhow::Result<()>>;

/// Condition checked before the phase action; `Ok(false)` skips the phase.
pub type PhaseCondition<D> = Box<dyn Fn(&D) -> anyhow::Result<bool>>;

/// Declaration of a workflow phase.
///
/// A phase without `run` is a pure grouping node. A phase marked
/// `run_all_siblings` only exists to generate a CLI sub-command that runs
/// every phase under its parent, and must declare neither `run` nor `run_if`.
pub struct Phase<D> {
    /// Unique among siblings. Anything after the first space is treated as
    /// an argument placeholder, e.g. `kubelet-start [api-server-endpoint]`.
    pub name: String,
    pub aliases: Vec<String>,
    pub short: String,
    pub long: String,
    pub example: String,
    /// Hidden phases still execute but are left out of help and sub-commands.
    pub hidden: bool,
    pub phases: Vec<Phase<D>>,
    pub run_all_siblings: bool,
    pub run: Option<PhaseAction<D>>,
    pub run_if: Option<PhaseCondition<D>>,
    /// Flags the phase sub-command copies from the parent command or the
    /// runner's additional flags. Empty means none.
    pub inherit_flags: Vec<String>,
    pub local_flags: Vec<Arg>,
    /// Positional arguments for the phase sub-command. `None` takes the
    /// parent command's positionals for leaves and nothing for groups.
    pub args: Option<Vec<Arg>>,
}

impl<D> Phase<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            short: String::new(),
            long: String::new(),
            example: String::new(),
            hidden: false,
            phases: Vec::new(),
            run_all_siblings: false,
            run: None,
            run_if: None,
            inherit_flags: Vec::new(),
            local_flags: Vec::new(),
            args: None,
        }
    }

    /// Aggregation phase running every sibling under the same parent.
    pub fn run_all_siblings(name: impl Into<String>) -> Self {
        let mut phase = Self::new(name);
        phase.run_all_siblings = true;
        phase
    }

    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.short = short.into();
        self
    }

    pub fn long(mut self, long: impl Into<String>) -> Self {
        self.long = long.into();
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn run<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut D) -> anyhow::Result<()> + 'static,
    {
        self.run = Some(Box::new(action));
        self
    }

    pub fn run_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&D) -> anyhow::Result<bool> + 'static,
    {
        self.run_if = Some(Box::new(condition));
        self
    }

    pub fn phases(mut self, phases: Vec<Phase<D>>) -> Self {
        self.phases = phases;
        self
    }

    pub fn inherit_flags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherit_flags = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn local_flag(mut self, arg: Arg) -> Self {
        self.local_flags.push(arg);
        self
    }

    pub fn args(mut self, args: Vec<Arg>) -> Self {
        self.args = Some(args);
        self
    }

    /// Add a nested phase at the end of the ordered sub-phase list.
    pub fn append_phase(&mut self, phase: Phase<D>) {
        self.phases.push(phase);
    }

    pub fn has_action(&self) -> bool {
        self.run.is_some() || self.run_if.is_some()
    }
}

impl<D> std::fmt::Debug for Phase<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .field("run_all_siblings", &self.run_all_siblings)
            .field("run", &self.run.is_some())
            .field("run_if", &self.run_if.is_some())
            .field("phases", &self.phases)
            .finish()
    }
}
