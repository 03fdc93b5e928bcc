#![forbid(unsafe_code)]

//! Command runners behind the `blockgraph` binary.
//!
//! Each runner takes a plain configuration struct, opens what it needs, and
//! returns a serializable report. Argument parsing and printing stay in the
//! binary.

/// Index, partition, analytics and inspection commands.
pub mod commands;
