pub mod chart;
pub mod classify;
pub mod config;
pub mod downsample;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod model;
pub mod narrative;
pub mod normalize;
pub mod registry;
pub mod report;

pub use engine::{AnalysisContext, analyze_file, analyze_files};
pub use error::{AnalysisError, Diagnostic};
pub use registry::PatternRegistry;
