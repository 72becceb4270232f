//! Probing and target bookkeeping
//!
//! - [`hours`]: monitoring-hours windows
//! - [`probe`]: HTTP probe executor
//! - [`registry`]: the set of targets monitored in the current session

pub mod hours;
pub mod probe;
pub mod registry;
