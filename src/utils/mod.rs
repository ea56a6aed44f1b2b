pub mod usage;

pub use usage::{UsageSnapshot, UsageTracker};
