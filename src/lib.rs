//! Serial oscilloscope and periodic-signal logger.
//!
//! Samples stream in from a serial device (or a simulated one), pass through a
//! zero-phase low-pass filter and a rising-edge trigger, and are summarised once per
//! aggregation window into peak-to-peak and level statistics.
pub mod args;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod settings;
pub mod types;
