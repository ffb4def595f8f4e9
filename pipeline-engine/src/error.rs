// Error types for the pipeline engine

use crate::artifacts::ArtifactError;
use crate::concurrency::GovernorError;
use crate::config::ConfigError;

use std::io;
use thiserror::Error;

/// A workflow definition could not be loaded. Fatal: no run is created.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("workflow declares no jobs")]
    NoJobs,

    #[error("job '{0}' is declared more than once")]
    DuplicateJob(String),

    #[error("job '{job}' depends on non-existent job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("job '{0}' depends on itself")]
    SelfDependency(String),

    #[error("circular dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("job '{job}' has no steps")]
    EmptyJob { job: String },

    #[error("matrix axis '{axis}' of job '{job}' has no values")]
    EmptyMatrixAxis { job: String, axis: String },

    #[error("matrix axis '{axis}' of job '{job}' contains a non-scalar value")]
    NonScalarMatrixValue { job: String, axis: String },

    #[error("exclude entry of job '{job}' references undeclared axis '{axis}'")]
    UnknownExcludeAxis { job: String, axis: String },

    #[error("step {index} in job '{job}': {message}")]
    InvalidStep {
        job: String,
        index: usize,
        message: String,
    },

    #[error("invalid expression '{source_text}' in {location}: {message}")]
    InvalidExpression {
        location: String,
        source_text: String,
        message: String,
    },

    #[error("{location} must be a scalar value")]
    NonScalarValue { location: String },

    #[error("invalid timeout in {location}: {minutes} minutes")]
    InvalidTimeout { location: String, minutes: f64 },

    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors surfaced by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Governor(#[from] GovernorError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to resolve concurrency group: {0}")]
    ConcurrencyGroup(String),

    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type LoadResult<T> = Result<T, LoadError>;
pub type EngineResult<T> = Result<T, EngineError>;
