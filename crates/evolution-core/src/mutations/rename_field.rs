use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SchemaBackend;
use crate::errors::EvolutionResult;
use crate::models::{FieldSignature, ProjectSignature};

use super::MutationContext;

/// Rename a field, optionally overriding the column (or, for many-to-many
/// fields, the association table) it maps to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameField {
    pub model_name: String,
    pub old_field_name: String,
    pub new_field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_db_table: Option<String>,
}

impl RenameField {
    pub fn new(model_name: &str, old_field_name: &str, new_field_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            old_field_name: old_field_name.to_string(),
            new_field_name: new_field_name.to_string(),
            new_column_name: None,
            new_db_table: None,
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.new_column_name = Some(column.to_string());
        self
    }

    pub fn with_db_table(mut self, table: &str) -> Self {
        self.new_db_table = Some(table.to_string());
        self
    }

    /// Field shape after the rename.  The override that does not apply to
    /// the field's kind is left untouched.
    fn renamed(&self, field: &FieldSignature) -> FieldSignature {
        let mut renamed = field.clone();
        if field.kind.is_many_to_many() {
            renamed.db_table = self.new_db_table.clone();
        } else {
            renamed.column_name = self.new_column_name.clone();
        }
        renamed
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        let model = ctx.model_mut(signature, &self.model_name)?;
        let failure = |message: &str, field_name: &str| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(field_name)
        };

        let Some((index, _, field)) = model.fields.shift_remove_full(&self.old_field_name) else {
            return Err(failure("Cannot rename a field that does not exist", &self.old_field_name).into());
        };
        if model.fields.contains_key(&self.new_field_name) {
            model.fields.shift_insert(index, self.old_field_name.clone(), field);
            return Err(failure("A field with the new name already exists", &self.new_field_name).into());
        }

        let renamed = self.renamed(&field);
        if renamed.primary_key {
            if let Some(column) = renamed.column(&self.new_field_name) {
                model.meta.pk_column = column;
            }
        }
        model.fields.shift_insert(index, self.new_field_name.clone(), renamed);

        for tuple in &mut model.meta.unique_together {
            for name in tuple.iter_mut() {
                if *name == self.old_field_name {
                    *name = self.new_field_name.clone();
                }
            }
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
        let old_field = model.field(&self.old_field_name).ok_or_else(|| {
            ctx.failure("Cannot rename a field that does not exist")
                .in_model(&self.model_name)
                .in_field(&self.old_field_name)
        })?;
        let new_field = self.renamed(old_field);

        if old_field.kind.is_many_to_many() {
            if old_field.through_model.is_some() {
                return Ok(Vec::new());
            }
            let old_table = backend.m2m_table(model, &self.old_field_name, old_field);
            let new_table = backend.m2m_table(model, &self.new_field_name, &new_field);
            return Ok(backend.rename_table(&old_table, &new_table));
        }

        match (
            old_field.column(&self.old_field_name),
            new_field.column(&self.new_field_name),
        ) {
            (Some(old_column), Some(new_column)) => Ok(backend.rename_column(model, &old_column, &new_column)),
            _ => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for RenameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RenameField(\"{}\", \"{}\", \"{}\"",
            self.model_name, self.old_field_name, self.new_field_name
        )?;
        if let Some(column) = &self.new_column_name {
            write!(f, ", new_column_name=\"{column}\"")?;
        }
        if let Some(table) = &self.new_db_table {
            write!(f, ", new_db_table=\"{table}\"")?;
        }
        f.write_str(")")
    }
}
