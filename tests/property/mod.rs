//! Property-based tests for the workflow engine

mod phase_tree;
