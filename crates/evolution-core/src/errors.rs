//! Error types for the evolution core library.

use std::fmt;

/// A mutation that is structurally invalid against the signature it was
/// simulated on.
///
/// Carries enough context (application, model, field, mutation) for the
/// command surface to print an actionable diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationFailure {
    pub app_label: String,
    pub model_name: Option<String>,
    pub field_name: Option<String>,
    /// Rendered form of the failing mutation. Filled in by the simulator.
    pub mutation: Option<String>,
    pub message: String,
}

impl SimulationFailure {
    pub fn new(app_label: &str, message: impl Into<String>) -> Self {
        Self {
            app_label: app_label.to_string(),
            model_name: None,
            field_name: None,
            mutation: None,
            message: message.into(),
        }
    }

    pub fn in_model(mut self, model_name: &str) -> Self {
        self.model_name = Some(model_name.to_string());
        self
    }

    pub fn in_field(mut self, field_name: &str) -> Self {
        self.field_name = Some(field_name.to_string());
        self
    }

    pub fn with_mutation(mut self, mutation: impl Into<String>) -> Self {
        self.mutation = Some(mutation.into());
        self
    }
}

impl fmt::Display for SimulationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        let location = match (&self.model_name, &self.field_name) {
            (Some(model), Some(field)) => format!("{}.{}.{}", self.app_label, model, field),
            (Some(model), None) => format!("{}.{}", self.app_label, model),
            _ => self.app_label.clone(),
        };
        write!(f, " (in {location})")?;
        if let Some(mutation) = &self.mutation {
            write!(f, " while simulating {mutation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SimulationFailure {}

/// Top-level error enum for the evolution core library.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    /// The mutation cannot verify its own effect on a signature.
    #[error("Cannot simulate {0}")]
    CannotSimulate(String),

    #[error("Simulation failure: {0}")]
    Simulation(#[from] SimulationFailure),

    /// No backend operation exists for the requested change.
    #[error("{backend} backend does not implement changing '{attribute}' on {model}.{field}")]
    NotImplemented {
        backend: String,
        model: String,
        field: String,
        attribute: String,
    },

    /// Post-simulation signature still differs from the target.
    #[error("Signatures do not match at end of simulation:\n{0}")]
    VerificationFailed(String),

    #[error("Error applying evolution (statement {index}): {message}\n    {statement}")]
    Execution {
        index: usize,
        statement: String,
        message: String,
    },

    /// Every statement ran but the history write, the integrity check or
    /// the commit itself failed.
    #[error("Error committing evolution: {0}")]
    Commit(String),

    #[error("{0} requires a user-provided initial value")]
    UserValueRequired(String),

    #[error("Can't evolve yet. Need to set an evolution baseline.")]
    NoBaseline,

    #[error("Unknown application '{0}'")]
    UnknownApplication(String),

    #[error("Invalid evolution script {label}: {message}")]
    InvalidScript { label: String, message: String },

    #[error("History store format {found} is newer than this release supports ({supported})")]
    UnsupportedStore { found: i64, supported: i64 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl EvolutionError {
    /// True for the recoverable "could not verify" condition.
    pub fn is_cannot_simulate(&self) -> bool {
        matches!(self, EvolutionError::CannotSimulate(_))
    }

    /// True when the failure happened while applying statements.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, EvolutionError::Execution { .. } | EvolutionError::Commit(_))
    }
}

pub type EvolutionResult<T> = Result<T, EvolutionError>;
