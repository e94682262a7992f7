//! Property-based tests for addressing, naming and ancestry

mod determinism;
