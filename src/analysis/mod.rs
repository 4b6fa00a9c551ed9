//! Cross-submission statistics for reports and exit-code checks.

pub mod aggregator;

pub use aggregator::*;
