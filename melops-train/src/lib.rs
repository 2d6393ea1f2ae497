//! Command implementations of the `mel-train` binary.

pub mod cli;
pub mod parse;
pub mod synth;
pub mod train;
