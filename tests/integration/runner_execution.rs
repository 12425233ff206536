//! Integration tests for the workflow runner: ordering, filtering, skipping
//! and failure handling observed through a recording run context.

use anyhow::anyhow;
use kubeboot::error::WorkflowError;
use kubeboot::workflow::{
    compute_run_flags, flatten, Phase, PhaseOutcome, Runner, RunnerOptions, SkipReason,
};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Default)]
struct Recorder {
    calls: Vec<String>,
    skip_c: bool,
}

fn record(name: &'static str) -> impl Fn(&mut Recorder) -> anyhow::Result<()> {
    move |rec: &mut Recorder| {
        rec.calls.push(name.to_string());
        Ok(())
    }
}

/// `A{B, C{D}}`
fn tree() -> Vec<Phase<Recorder>> {
    vec![Phase::new("A").run(record("a")).phases(vec![
        Phase::new("B").run(record("a/b")),
        Phase::new("C")
            .run(record("a/c"))
            .phases(vec![Phase::new("D").run(record("a/c/d"))]),
    ])]
}

fn runner(phases: Vec<Phase<Recorder>>) -> Runner<Recorder> {
    let mut runner = Runner::new();
    for phase in phases {
        runner.append_phase(phase);
    }
    runner.set_data_initializer(|_, _| Ok(Recorder::default()));
    runner
}

fn calls(runner: &Runner<Recorder>) -> Vec<String> {
    runner.data().map(|r| r.calls.clone()).unwrap_or_default()
}

fn flags(filter: &[&str], skip: &[&str]) -> Vec<(String, bool)> {
    let phases = tree();
    let nodes = flatten(&phases);
    let options = RunnerOptions {
        filter_phases: filter.iter().map(|s| s.to_string()).collect(),
        skip_phases: skip.iter().map(|s| s.to_string()).collect(),
    };
    compute_run_flags(&nodes, &options).unwrap().into_iter().collect()
}

#[test]
fn test_filter_inclusion_propagates_down() {
    assert_eq!(
        flags(&["a/c"], &[]),
        vec![
            ("a".to_string(), false),
            ("a/b".to_string(), false),
            ("a/c".to_string(), true),
            ("a/c/d".to_string(), true),
        ]
    );
}

#[test]
fn test_skip_always_wins_over_filter() {
    assert_eq!(
        flags(&["a"], &["a/c"]),
        vec![
            ("a".to_string(), true),
            ("a/b".to_string(), true),
            ("a/c".to_string(), false),
            ("a/c/d".to_string(), false),
        ]
    );
}

#[test]
fn test_full_run_follows_pre_order() {
    let mut runner = runner(tree());
    runner.run(&[]).unwrap();
    assert_eq!(calls(&runner), vec!["a", "a/b", "a/c", "a/c/d"]);
}

#[test]
fn test_filtered_run_executes_subtree_only() {
    let mut runner = runner(tree());
    runner.options.filter_phases = vec!["a/c".to_string()];
    runner.run(&[]).unwrap();
    assert_eq!(calls(&runner), vec!["a/c", "a/c/d"]);
    assert_eq!(
        runner.outcomes()[0],
        ("a".to_string(), PhaseOutcome::Skipped(SkipReason::Options))
    );
}

#[test]
fn test_unknown_skip_name_runs_nothing() {
    let mut runner = runner(tree());
    runner.options.skip_phases = vec!["a/zzz".to_string()];
    let err = runner.run(&[]).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownPhase(ref name) if name == "a/zzz"));
    assert!(calls(&runner).is_empty());
}

#[test]
fn test_fail_fast_abort() {
    let a = Rc::new(Cell::new(0));
    let b = Rc::new(Cell::new(0));
    let c = Rc::new(Cell::new(0));
    let (ca, cb, cc) = (a.clone(), b.clone(), c.clone());

    let mut runner = runner(vec![
        Phase::new("A").run(move |_: &mut Recorder| {
            ca.set(ca.get() + 1);
            Ok(())
        }),
        Phase::new("B").run(move |_: &mut Recorder| {
            cb.set(cb.get() + 1);
            Err(anyhow!("etcd unreachable"))
        }),
        Phase::new("C").run(move |_: &mut Recorder| {
            cc.set(cc.get() + 1);
            Ok(())
        }),
    ]);

    let err = runner.run(&[]).unwrap_err();
    assert_eq!((a.get(), b.get(), c.get()), (1, 1, 0));
    assert_eq!(err.to_string(), "error execution phase b: etcd unreachable");
    assert_eq!(err.phase(), Some("b"));
}

#[test]
fn test_condition_false_is_not_an_error_and_does_not_cascade() {
    let mut runner = runner(vec![
        Phase::new("A").run(record("a")).phases(vec![
            Phase::new("B").run(record("a/b")),
            Phase::new("C")
                .run_if(|rec: &Recorder| Ok(!rec.skip_c))
                .run(record("a/c"))
                .phases(vec![Phase::new("D").run(record("a/c/d"))]),
        ]),
    ]);
    runner.init_data(&[]).unwrap().skip_c = true;
    runner.run(&[]).unwrap();

    assert_eq!(calls(&runner), vec!["a", "a/b", "a/c/d"]);
    assert!(runner
        .outcomes()
        .contains(&("a/c".to_string(), PhaseOutcome::Skipped(SkipReason::Condition))));
}

#[test]
fn test_run_all_siblings_guard_fires_before_the_node_runs() {
    let mut runner = runner(vec![Phase::new("certs").phases(vec![
        Phase::new("ca").run(record("certs/ca")),
        Phase::run_all_siblings("all").run(record("certs/all")),
    ])]);
    let err = runner.run(&[]).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidPhaseConfiguration(ref name) if name == "certs/all"));
    assert_eq!(calls(&runner), vec!["certs/ca"]);
}

#[test]
fn test_context_singleton() {
    let factory_calls = Rc::new(Cell::new(0));
    let counter = factory_calls.clone();
    let mut runner: Runner<Recorder> = Runner::new();
    runner.append_phase(Phase::new("a").run(record("a")));
    runner.set_data_initializer(move |_, _| {
        counter.set(counter.get() + 1);
        Ok(Recorder::default())
    });

    runner.init_data(&[]).unwrap();
    runner.init_data(&["ignored".to_string()]).unwrap();
    runner.run(&[]).unwrap();

    assert_eq!(factory_calls.get(), 1);
    assert_eq!(calls(&runner), vec!["a"]);
}

#[test]
fn test_context_failure_is_retried() {
    let attempts = Rc::new(Cell::new(0));
    let counter = attempts.clone();
    let mut runner: Runner<Recorder> = Runner::new();
    runner.append_phase(Phase::new("a").run(record("a")));
    runner.set_data_initializer(move |_, _| {
        counter.set(counter.get() + 1);
        if counter.get() == 1 {
            return Err(anyhow!("api server not reachable"));
        }
        Ok(Recorder::default())
    });

    let err = runner.run(&[]).unwrap_err();
    assert!(matches!(err, WorkflowError::ContextInitialization(_)));
    assert!(runner.data().is_none());

    runner.run(&[]).unwrap();
    assert_eq!(attempts.get(), 2);
    assert_eq!(calls(&runner), vec!["a"]);
}
