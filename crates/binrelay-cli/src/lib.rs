//! Configuration loading and logging plumbing for the binrelay binary.

pub mod config;
pub mod rolling;
