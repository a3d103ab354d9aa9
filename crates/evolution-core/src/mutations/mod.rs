//! Schema mutations.
//!
//! A [`Mutation`] is one atomic structural operation with two independent
//! halves: `simulate` replays its logical effect on a signature, `mutate`
//! asks a [`SchemaBackend`] for the physical statements.  The pipeline always
//! hands `mutate` the signature as it stood *before* the same mutation's
//! `simulate`, so physical names are resolved from the pre-change shape.

pub mod add_field;
pub mod change_field;
pub mod delete_application;
pub mod delete_field;
pub mod delete_model;
pub mod raw_sql;
pub mod rename_field;
pub mod routing;
pub mod simulator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SchemaBackend;
use crate::errors::{EvolutionResult, SimulationFailure};
use crate::models::{ModelSignature, ProjectSignature};

pub use add_field::AddField;
pub use change_field::ChangeField;
pub use delete_application::DeleteApplication;
pub use delete_field::DeleteField;
pub use delete_model::DeleteModel;
pub use raw_sql::{RawSql, SignatureUpdate};
pub use rename_field::RenameField;
pub use routing::{DatabaseRouter, SingleDatabase, StaticRouter, DEFAULT_DATABASE};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Where a mutation runs: the owning application and the physical store
/// statements are generated for.
#[derive(Clone, Copy)]
pub struct MutationContext<'a> {
    pub app_label: &'a str,
    pub database: &'a str,
    pub router: &'a dyn DatabaseRouter,
}

impl<'a> MutationContext<'a> {
    /// Context for a single-store deployment.
    pub fn new(app_label: &'a str) -> Self {
        Self {
            app_label,
            database: DEFAULT_DATABASE,
            router: &SingleDatabase,
        }
    }

    pub fn with_database(mut self, database: &'a str, router: &'a dyn DatabaseRouter) -> Self {
        self.database = database;
        self.router = router;
        self
    }

    /// True when `model_name` of this context's application lives in the
    /// targeted store.
    pub fn owns(&self, model_name: &str) -> bool {
        self.router.allow_evolve(self.database, self.app_label, model_name)
    }

    pub(crate) fn failure(&self, message: impl Into<String>) -> SimulationFailure {
        SimulationFailure::new(self.app_label, message)
    }

    pub(crate) fn model<'s>(
        &self,
        signature: &'s ProjectSignature,
        model_name: &str,
    ) -> Result<&'s ModelSignature, SimulationFailure> {
        let app = signature
            .app(self.app_label)
            .ok_or_else(|| self.failure("Unknown application"))?;
        app.model(model_name)
            .ok_or_else(|| self.failure("Unknown model").in_model(model_name))
    }

    pub(crate) fn model_mut<'s>(
        &self,
        signature: &'s mut ProjectSignature,
        model_name: &str,
    ) -> Result<&'s mut ModelSignature, SimulationFailure> {
        let app = signature
            .app_mut(self.app_label)
            .ok_or_else(|| self.failure("Unknown application"))?;
        app.models
            .get_mut(model_name)
            .ok_or_else(|| self.failure("Unknown model").in_model(model_name))
    }
}

impl fmt::Debug for MutationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationContext")
            .field("app_label", &self.app_label)
            .field("database", &self.database)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// Closed set of mutation variants.  Stored scripts serialize each entry as
/// an object tagged with `"type"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    AddField(AddField),
    DeleteField(DeleteField),
    RenameField(RenameField),
    ChangeField(ChangeField),
    DeleteModel(DeleteModel),
    DeleteApplication(DeleteApplication),
    RawSql(RawSql),
}

impl Mutation {
    /// Apply the logical effect to `signature` in place.
    ///
    /// Fails with [`crate::errors::EvolutionError::Simulation`] when the
    /// mutation is structurally invalid, or with
    /// [`crate::errors::EvolutionError::CannotSimulate`] when it cannot
    /// describe its own effect.
    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        match self {
            Mutation::AddField(m) => m.simulate(ctx, signature),
            Mutation::DeleteField(m) => m.simulate(ctx, signature),
            Mutation::RenameField(m) => m.simulate(ctx, signature),
            Mutation::ChangeField(m) => m.simulate(ctx, signature),
            Mutation::DeleteModel(m) => m.simulate(ctx, signature),
            Mutation::DeleteApplication(m) => m.simulate(ctx, signature),
            Mutation::RawSql(m) => m.simulate(ctx, signature),
        }
    }

    /// Physical statements for this mutation.  Never modifies `signature`.
    pub fn mutate(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> EvolutionResult<Vec<String>> {
        match self {
            Mutation::AddField(m) => m.mutate(ctx, signature, backend),
            Mutation::DeleteField(m) => m.mutate(ctx, signature, backend),
            Mutation::RenameField(m) => m.mutate(ctx, signature, backend),
            Mutation::ChangeField(m) => m.mutate(ctx, signature, backend),
            Mutation::DeleteModel(m) => m.mutate(ctx, signature, backend),
            Mutation::DeleteApplication(m) => m.mutate(ctx, signature, backend),
            Mutation::RawSql(m) => Ok(m.sql.clone()),
        }
    }

    /// Whether this mutation produces statements for the context's store.
    pub fn is_mutable(&self, ctx: &MutationContext<'_>) -> bool {
        match self.model_name() {
            Some(model_name) => ctx.owns(model_name),
            None => true,
        }
    }

    /// The model a model-scoped mutation targets.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Mutation::AddField(m) => Some(&m.model_name),
            Mutation::DeleteField(m) => Some(&m.model_name),
            Mutation::RenameField(m) => Some(&m.model_name),
            Mutation::ChangeField(m) => Some(&m.model_name),
            Mutation::DeleteModel(m) => Some(&m.model_name),
            Mutation::DeleteApplication(_) | Mutation::RawSql(_) => None,
        }
    }

    /// True while a hinted placeholder initial value is still unfilled.
    pub fn requires_user_value(&self) -> bool {
        let initial = match self {
            Mutation::AddField(m) => m.initial.as_ref(),
            Mutation::ChangeField(m) => m.initial.as_ref(),
            _ => None,
        };
        initial.is_some_and(|value| value.is_placeholder())
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::AddField(m) => fmt::Display::fmt(m, f),
            Mutation::DeleteField(m) => fmt::Display::fmt(m, f),
            Mutation::RenameField(m) => fmt::Display::fmt(m, f),
            Mutation::ChangeField(m) => fmt::Display::fmt(m, f),
            Mutation::DeleteModel(m) => fmt::Display::fmt(m, f),
            Mutation::DeleteApplication(m) => fmt::Display::fmt(m, f),
            Mutation::RawSql(m) => fmt::Display::fmt(m, f),
        }
    }
}
