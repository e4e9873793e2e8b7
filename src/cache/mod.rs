pub mod report_cache;

pub use report_cache::{CachedReport, ReportCache};
