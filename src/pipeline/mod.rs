//! Document-understanding pipeline for loan-servicing email.
//!
//! Every submission flows through:
//! 1. `TextAggregator::aggregate()` — body + attachment text, attributed
//! 2. `Strategy::classify()` / `Strategy::extract()` — oracle or rules
//! 3. `SecondaryDetector::detect()` — additional requests in the text
//! 4. `Strategy::check_duplicate()` — fingerprint or reference policy
//!
//! `IntakePipeline` sequences the steps and builds the `PipelineResult`.

pub mod aggregate;
pub mod classifier;
pub mod duplicate;
pub mod fields;
pub mod processor;
pub mod rules;
pub mod secondary;
pub mod strategy;
pub mod types;

pub use processor::IntakePipeline;
pub use strategy::{Strategy, StrategyKind};
