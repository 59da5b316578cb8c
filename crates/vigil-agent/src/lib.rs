//! Measurement node agent: decides when to refresh the schedule from the
//! controller and when to ship stored results back, and does both through
//! whichever storage backend the node is configured with.

pub mod cycle;
pub mod daemon;
pub mod logging;
pub mod schedule;
pub mod scheduler;
pub mod upload;

pub use cycle::{Agent, CycleReport};
