//! Integration and property tests for the exemplar workspace.
//!
//! All tests live under `tests/`; this crate intentionally exports
//! nothing.
