//! Run-flag computation: which flattened phases should run for the given
//! filter and skip options.

use crate::error::WorkflowError;
use crate::workflow::node::PhaseNode;
use crate::workflow::runner::RunnerOptions;
use std::collections::{BTreeMap, HashMap};

/// Generated phase name to "should run".
pub type RunFlags = BTreeMap<String, bool>;

/// Compute the run flag of every node.
///
/// An empty filter selects every phase. Filtering on a phase selects all of
/// its descendants too. Skips are applied after the filter, so a skipped
/// phase and its descendants never run, even when explicitly filtered.
pub fn compute_run_flags<D>(
    nodes: &[PhaseNode<'_, D>],
    options: &RunnerOptions,
) -> Result<RunFlags, WorkflowError> {
    let mut flags = RunFlags::new();
    let hierarchy = descendants(nodes);

    for node in nodes {
        flags.insert(node.generated_name.clone(), true);
    }

    if !options.filter_phases.is_empty() {
        for flag in flags.values_mut() {
            *flag = false;
        }
        for name in &options.filter_phases {
            set_subtree(&mut flags, &hierarchy, name, true)?;
        }
    }

    for name in &options.skip_phases {
        set_subtree(&mut flags, &hierarchy, name, false)?;
    }

    Ok(flags)
}

fn set_subtree(
    flags: &mut RunFlags,
    hierarchy: &HashMap<String, Vec<String>>,
    name: &str,
    value: bool,
) -> Result<(), WorkflowError> {
    match flags.get_mut(name) {
        Some(flag) => *flag = value,
        None => return Err(WorkflowError::UnknownPhase(name.to_string())),
    }
    if let Some(children) = hierarchy.get(name) {
        for child in children {
            flags.insert(child.clone(), value);
        }
    }
    Ok(())
}

/// Every node's transitive descendants, keyed by generated name.
fn descendants<D>(nodes: &[PhaseNode<'_, D>]) -> HashMap<String, Vec<String>> {
    let mut hierarchy: HashMap<String, Vec<String>> = HashMap::new();
    for node in nodes {
        hierarchy.entry(node.generated_name.clone()).or_default();
        let mut parent = node.parent;
        while let Some(index) = parent {
            let ancestor = &nodes[index];
            hierarchy
                .entry(ancestor.generated_name.clone())
                .or_default()
                .push(node.generated_name.clone());
            parent = ancestor.parent;
        }
    }
    hierarchy
}
