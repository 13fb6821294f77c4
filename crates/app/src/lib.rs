pub mod config;
pub mod delivery;
pub mod pipeline;

pub use config::{AppConfig, ConfigError};
pub use pipeline::{
    CancelToken, FailureKind, PipelineError, PipelineOrchestrator, Remediation, RunSummary, Stage,
};
