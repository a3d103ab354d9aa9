use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{EvolutionError, EvolutionResult};
use crate::models::ProjectSignature;

use super::MutationContext;

/// Describes the signature effect of raw statements.  Receives the owning
/// application label.
pub type SignatureUpdate = Arc<dyn Fn(&str, &mut ProjectSignature) -> Result<(), String> + Send + Sync>;

/// Literal statements, passed through verbatim.
///
/// Without an update function the statements are opaque: simulation reports
/// [`EvolutionError::CannotSimulate`] and the run is marked unverified.
#[derive(Clone, Serialize, Deserialize)]
pub struct RawSql {
    pub sql: Vec<String>,
    #[serde(skip)]
    pub update: Option<SignatureUpdate>,
}

impl RawSql {
    pub fn new(sql: Vec<String>) -> Self {
        Self { sql, update: None }
    }

    pub fn with_update<F>(sql: Vec<String>, update: F) -> Self
    where
        F: Fn(&str, &mut ProjectSignature) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            sql,
            update: Some(Arc::new(update)),
        }
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        match &self.update {
            Some(update) => update(ctx.app_label, signature).map_err(|message| ctx.failure(message).into()),
            None => Err(EvolutionError::CannotSimulate(self.to_string())),
        }
    }
}

impl fmt::Debug for RawSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSql")
            .field("sql", &self.sql)
            .field("update", &self.update.is_some())
            .finish()
    }
}

impl PartialEq for RawSql {
    fn eq(&self, other: &Self) -> bool {
        self.sql == other.sql
            && match (&self.update, &other.update) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl fmt::Display for RawSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSql({:?})", self.sql)
    }
}
