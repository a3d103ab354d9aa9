use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{AssociationTable, SchemaBackend};
use crate::errors::{EvolutionResult, SimulationFailure};
use crate::models::{split_model_ref, FieldKind, FieldSignature, InitialValue, ProjectSignature};

use super::MutationContext;

/// Add a field to an existing model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddField {
    pub model_name: String,
    pub field_name: String,
    pub field: FieldSignature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<InitialValue>,
}

impl AddField {
    pub fn new(model_name: &str, field_name: &str, field: FieldSignature, initial: Option<InitialValue>) -> Self {
        Self {
            model_name: model_name.to_string(),
            field_name: field_name.to_string(),
            field,
            initial,
        }
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        let model = ctx.model_mut(signature, &self.model_name)?;
        let failure = |message: &str| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        };

        if model.fields.contains_key(&self.field_name) {
            return Err(failure("A field with this name already exists").into());
        }
        if self.field.requires_initial_value() && self.initial.is_none() {
            return Err(failure("Cannot create new non-nullable column without an initial value").into());
        }
        if self.field.kind.is_many_to_many() && self.field.related_model.is_none() {
            return Err(failure("Many-to-many field has no related model").into());
        }

        model.fields.insert(self.field_name.clone(), self.field.clone());
        Ok(())
    }

    pub fn mutate(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> EvolutionResult<Vec<String>> {
        let model = ctx.model(signature, &self.model_name)?;

        if self.field.kind.is_many_to_many() {
            if self.field.through_model.is_some() {
                return Ok(Vec::new());
            }
            let table = self.association_table(ctx, signature, backend)?;
            return Ok(backend.add_table(&table));
        }

        let mut sql = backend.add_column(model, &self.field_name, &self.field, self.initial.as_ref());
        if self.field.indexed && !self.field.unique && self.field.kind.traits().supports_index {
            sql.extend(backend.create_index(model, &self.field_name, &self.field, false));
        }
        Ok(sql)
    }

    fn association_table(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> Result<AssociationTable, SimulationFailure> {
        let failure = |message: String| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        };
        let owner = ctx.model(signature, &self.model_name)?;
        let reference = self
            .field
            .related_model
            .as_deref()
            .ok_or_else(|| failure("Many-to-many field has no related model".to_string()))?;
        let (_, related_name) =
            split_model_ref(reference).ok_or_else(|| failure(format!("Malformed model reference '{reference}'")))?;
        let related = signature
            .resolve(reference)
            .ok_or_else(|| failure(format!("Unknown related model '{reference}'")))?;

        let self_referential = reference == format!("{}.{}", ctx.app_label, self.model_name);
        let (source_column, target_column) =
            crate::backend::naming::m2m_columns(&self.model_name, related_name, self_referential);

        let auto_pk = FieldSignature::new(FieldKind::Auto).with_primary_key();
        let source_pk = owner.primary_key_field().map_or(&auto_pk, |(_, f)| f);
        let target_pk = related.primary_key_field().map_or(&auto_pk, |(_, f)| f);

        Ok(AssociationTable {
            table: backend.m2m_table(owner, &self.field_name, &self.field),
            source_column,
            source_table: owner.meta.db_table.clone(),
            source_pk: owner.meta.pk_column.clone(),
            source_type: backend.reference_type(source_pk),
            target_column,
            target_table: related.meta.db_table.clone(),
            target_pk: related.meta.pk_column.clone(),
            target_type: backend.reference_type(target_pk),
        })
    }
}

impl fmt::Display for AddField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddField(\"{}\", \"{}\", {}", self.model_name, self.field_name, self.field.kind)?;
        for (attribute, value) in self.field.explicit_attributes().into_iter().skip(1) {
            write!(f, ", {attribute}={value}")?;
        }
        if let Some(initial) = &self.initial {
            write!(f, ", initial={initial}")?;
        }
        f.write_str(")")
    }
}
