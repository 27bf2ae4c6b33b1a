//! Kernel wiring and the interactive REPL, shared by the `aeon` binary
//! and the end-to-end tests.

pub mod gateway;
pub mod repl;
