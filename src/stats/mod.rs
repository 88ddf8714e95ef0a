//! Statistics for the relay and the chat room

pub mod metrics;

pub use metrics::{StatsSnapshot, StreamStats};
