//! artlab CLI library: argument definitions and command execution.

pub mod cli;
pub mod info;
pub mod process;
