pub mod engine;
pub mod report;

pub use crate::domain::ports::{Pipeline, Storage};
pub use engine::ReportEngine;
pub use report::{ReportOptions, ReportOutcome, ReportPipeline};
