//! Degradation Planner and Quality Scorer: pure functions that decide the
//! ordered fallback chain for a request and the quality tuple attached to
//! whatever it resolves to.

pub mod plan;
pub mod quality;

pub use plan::{DegradationPlan, Step, StepKind, build_plan};
pub use quality::score;
