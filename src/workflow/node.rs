//! Phase tree flattening.
//!
//! The declared phase tree is turned into an ordered list of [`PhaseNode`]s,
//! pre-order: every node is immediately followed by the nodes of its own
//! sub-phases, before any later sibling. That order is the execution order.

use crate::workflow::phase::Phase;

/// Separator used when joining nested phase names.
pub const PHASE_SEPARATOR: &str = "/";

/// A phase together with its position in the workflow hierarchy.
pub struct PhaseNode<'a, D> {
    pub phase: &'a Phase<D>,
    /// Index of the enclosing node in the flattened list.
    pub parent: Option<usize>,
    pub level: usize,
    pub path: Vec<String>,
    /// Absolute, `/`-joined name; unique within one runner.
    pub generated_name: String,
    /// Name shown in the workflow help, relative to the parent.
    pub use_name: String,
}

impl<'a, D> PhaseNode<'a, D> {
    pub fn is_leaf(&self) -> bool {
        self.phase.phases.is_empty()
    }

    /// Hidden phases and aggregation phases are not listed in the help.
    pub fn is_listed(&self) -> bool {
        !self.phase.hidden && !self.phase.run_all_siblings
    }
}

impl<'a, D> std::fmt::Debug for PhaseNode<'a, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseNode")
            .field("generated_name", &self.generated_name)
            .field("parent", &self.parent)
            .field("level", &self.level)
            .finish()
    }
}

/// Lower-cases the name and strips argument descriptors, if any.
pub fn clean_name(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.find(' ') {
        Some(pos) => lower[..pos].to_string(),
        None => lower,
    }
}

/// Flatten top-level phases into execution order.
///
/// Top-level aggregation phases have no parent to aggregate and produce no
/// node; their sub-phases, if any, are flattened as top-level nodes.
pub fn flatten<D>(phases: &[Phase<D>]) -> Vec<PhaseNode<'_, D>> {
    let mut nodes = Vec::new();
    for phase in phases {
        if phase.run_all_siblings {
            for child in &phase.phases {
                add_node(&mut nodes, None, child);
            }
            continue;
        }
        add_node(&mut nodes, None, phase);
    }
    nodes
}

fn add_node<'a, D>(nodes: &mut Vec<PhaseNode<'a, D>>, parent: Option<usize>, phase: &'a Phase<D>) {
    let own = clean_name(&phase.name);

    let (generated_name, use_name, path) = match parent {
        Some(index) => {
            let parent_node = &nodes[index];
            let mut path = parent_node.path.clone();
            path.push(own.clone());
            (
                format!("{}{}{}", parent_node.generated_name, PHASE_SEPARATOR, own),
                format!("{}{}", PHASE_SEPARATOR, own),
                path,
            )
        }
        None => (own.clone(), own.clone(), vec![own]),
    };

    nodes.push(PhaseNode {
        phase,
        parent,
        level: path.len() - 1,
        path,
        generated_name,
        use_name,
    });

    let index = nodes.len() - 1;
    for child in &phase.phases {
        add_node(nodes, Some(index), child);
    }
}

/// Indices of the direct children of `index`, in declaration order.
pub fn children_of<D>(nodes: &[PhaseNode<'_, D>], index: usize) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.parent == Some(index))
        .map(|(i, _)| i)
        .collect()
}

/// Position of the node with the given generated name.
pub fn position<D>(nodes: &[PhaseNode<'_, D>], generated_name: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|node| node.generated_name == generated_name)
}
