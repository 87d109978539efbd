//! Error type definitions for the TSB subsystem.

mod types;

pub use types::*;
