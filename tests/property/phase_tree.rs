//! Property-based tests for phase tree flattening, run-flag computation and
//! execution order over arbitrary trees.

use kubeboot::workflow::{
    compute_run_flags, flatten, Phase, PhaseNode, Runner, RunnerOptions, PHASE_SEPARATOR,
};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::HashSet;

/// Shape of a phase tree; names are assigned when it is built.
#[derive(Debug, Clone)]
struct Shape(Vec<Shape>);

fn forest() -> impl Strategy<Value = Vec<Shape>> {
    let leaf = Just(Shape(Vec::new()));
    let node = leaf.prop_recursive(3, 32, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Shape)
    });
    prop::collection::vec(node, 1..5)
}

/// Mixed-case names with an argument descriptor, to exercise name cleaning.
fn build(shapes: &[Shape], parent: &str) -> Vec<Phase<Vec<String>>> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, shape)| {
            let own = format!("Step{}", i);
            let generated = if parent.is_empty() {
                own.to_lowercase()
            } else {
                format!("{}{}{}", parent, PHASE_SEPARATOR, own.to_lowercase())
            };
            let recorded = generated.clone();
            Phase::new(format!("{} [node-name]", own))
                .run(move |calls: &mut Vec<String>| {
                    calls.push(recorded.clone());
                    Ok(())
                })
                .phases(build(&shape.0, &generated))
        })
        .collect()
}

fn is_ancestor_or_self(nodes: &[PhaseNode<'_, Vec<String>>], ancestor: usize, node: usize) -> bool {
    let mut current = Some(node);
    while let Some(index) = current {
        if index == ancestor {
            return true;
        }
        current = nodes[index].parent;
    }
    false
}

fn pick(nodes: &[PhaseNode<'_, Vec<String>>], indices: &[Index]) -> Vec<String> {
    indices
        .iter()
        .map(|i| nodes[i.index(nodes.len())].generated_name.clone())
        .collect()
}

proptest! {
    #[test]
    fn flattened_names_are_unique_and_nested(shapes in forest()) {
        let phases = build(&shapes, "");
        let nodes = flatten(&phases);

        let unique: HashSet<&str> = nodes.iter().map(|n| n.generated_name.as_str()).collect();
        prop_assert_eq!(unique.len(), nodes.len());

        for (index, node) in nodes.iter().enumerate() {
            prop_assert_eq!(node.level, node.path.len() - 1);
            prop_assert!(!node.generated_name.contains(' '));
            match node.parent {
                Some(parent) => {
                    prop_assert!(parent < index);
                    prop_assert_eq!(
                        &node.generated_name,
                        &format!("{}/{}", nodes[parent].generated_name, node.path[node.level])
                    );
                }
                None => prop_assert_eq!(node.level, 0),
            }
        }
    }

    #[test]
    fn every_subtree_is_contiguous(shapes in forest()) {
        let phases = build(&shapes, "");
        let nodes = flatten(&phases);

        for root in 0..nodes.len() {
            let members: Vec<usize> = (0..nodes.len())
                .filter(|&n| is_ancestor_or_self(&nodes, root, n))
                .collect();
            let expected: Vec<usize> = (root..root + members.len()).collect();
            prop_assert_eq!(members, expected);
        }
    }

    #[test]
    fn run_flags_follow_filter_then_skip(
        shapes in forest(),
        filter in prop::collection::vec(any::<Index>(), 0..3),
        skip in prop::collection::vec(any::<Index>(), 0..3),
    ) {
        let phases = build(&shapes, "");
        let nodes = flatten(&phases);
        let options = RunnerOptions {
            filter_phases: pick(&nodes, &filter),
            skip_phases: pick(&nodes, &skip),
        };
        let flags = compute_run_flags(&nodes, &options).unwrap();

        prop_assert_eq!(flags.len(), nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let selected = |names: &[String]| {
                names.iter().any(|name| {
                    let at = nodes.iter().position(|n| &n.generated_name == name).unwrap();
                    is_ancestor_or_self(&nodes, at, index)
                })
            };
            let expected = (options.filter_phases.is_empty() || selected(&options.filter_phases))
                && !selected(&options.skip_phases);
            prop_assert_eq!(flags[&node.generated_name], expected, "{}", node.generated_name);
        }
    }

    #[test]
    fn runner_executes_flagged_phases_in_pre_order(
        shapes in forest(),
        skip in prop::collection::vec(any::<Index>(), 0..3),
    ) {
        let phases = build(&shapes, "");
        let (expected, skip_phases) = {
            let reference = build(&shapes, "");
            let nodes = flatten(&reference);
            let options = RunnerOptions {
                filter_phases: Vec::new(),
                skip_phases: pick(&nodes, &skip),
            };
            let flags = compute_run_flags(&nodes, &options).unwrap();
            let expected: Vec<String> = nodes
                .iter()
                .filter(|n| flags[&n.generated_name])
                .map(|n| n.generated_name.clone())
                .collect();
            (expected, options.skip_phases)
        };

        let mut runner: Runner<Vec<String>> = Runner::new();
        for phase in phases {
            runner.append_phase(phase);
        }
        runner.set_data_initializer(|_, _| Ok(Vec::new()));
        runner.options.skip_phases = skip_phases;
        runner.run(&[]).unwrap();

        prop_assert_eq!(runner.data().cloned().unwrap_or_default(), expected);
    }
}
