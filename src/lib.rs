//! Local time-shift buffer subsystem for an adaptive media player.
//!
//! Records live fragments to a content-addressed store, indexes them per
//! track, associates timed ad metadata, evicts under space and duration
//! pressure, and replays them back as seekable, rate-adjustable readers.

pub mod config;
pub mod errors;
pub mod tsb;

pub use config::Config;
pub use errors::TsbError;
