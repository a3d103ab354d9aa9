use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SchemaBackend;
use crate::errors::EvolutionResult;
use crate::models::{ModelSignature, ProjectSignature};

use super::MutationContext;

/// Remove a model and its table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteModel {
    pub model_name: String,
}

impl DeleteModel {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
        }
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        ctx.model(signature, &self.model_name)?;
        if let Some(app) = signature.app_mut(ctx.app_label) {
            app.models.remove(&self.model_name);
        }
        Ok(())
    }

    pub fn mutate(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> EvolutionResult<Vec<String>> {
        let model = ctx.model(signature, &self.model_name)?;
        Ok(drop_model(model, backend))
    }
}

/// Association tables owned by `model`, then the model's own table.
pub(crate) fn drop_model(model: &ModelSignature, backend: &dyn SchemaBackend) -> Vec<String> {
    let mut sql = Vec::new();
    for (name, field) in &model.fields {
        if field.kind.is_many_to_many() && field.through_model.is_none() {
            sql.extend(backend.drop_table(&backend.m2m_table(model, name, field)));
        }
    }
    sql.extend(backend.drop_table(&model.meta.db_table));
    sql
}

impl fmt::Display for DeleteModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeleteModel(\"{}\")", self.model_name)
    }
}
