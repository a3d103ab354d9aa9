use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SchemaBackend;
use crate::errors::EvolutionResult;
use crate::models::ProjectSignature;

use super::MutationContext;

/// Remove a field from a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteField {
    pub model_name: String,
    pub field_name: String,
}

impl DeleteField {
    pub fn new(model_name: &str, field_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            field_name: field_name.to_string(),
        }
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        let model = ctx.model_mut(signature, &self.model_name)?;
        let failure = |message: &str| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        };

        match model.fields.get(&self.field_name) {
            None => return Err(failure("Cannot delete a field that does not exist").into()),
            Some(field) if field.primary_key => return Err(failure("Cannot delete a primary key").into()),
            Some(_) => {}
        }

        model.fields.shift_remove(&self.field_name);
        for tuple in &mut model.meta.unique_together {
            tuple.retain(|name| name != &self.field_name);
        }
        model.meta.unique_together.retain(|tuple| !tuple.is_empty());
        Ok(())
    }

    pub fn mutate(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> EvolutionResult<Vec<String>> {
        let model = ctx.model(signature, &self.model_name)?;
        let field = model.field(&self.field_name).ok_or_else(|| {
            ctx.failure("Cannot delete a field that does not exist")
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        })?;

        if field.kind.is_many_to_many() {
            if field.through_model.is_some() {
                return Ok(Vec::new());
            }
            return Ok(backend.drop_table(&backend.m2m_table(model, &self.field_name, field)));
        }
        Ok(backend.drop_column(model, &self.field_name, field))
    }
}

impl fmt::Display for DeleteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeleteField(\"{}\", \"{}\")", self.model_name, self.field_name)
    }
}
