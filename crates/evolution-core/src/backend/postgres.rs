//! PostgreSQL statement generation.

use crate::errors::EvolutionResult;
use crate::models::{Attribute, FieldKind, FieldSignature, InitialValue, ModelSignature};

use super::{FieldChange, SchemaBackend};

/// NAMEDATALEN - 1.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresBackend;

impl SchemaBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn max_name_length(&self) -> Option<usize> {
        Some(MAX_IDENTIFIER_LENGTH)
    }

    fn quote_name(&self, name: &str) -> String {
        super::naming::quote_identifier(&self.truncate_name(name))
    }

    fn column_type(&self, field: &FieldSignature) -> String {
        match field.kind {
            FieldKind::Auto => "serial".to_string(),
            FieldKind::BigAuto => "bigserial".to_string(),
            FieldKind::Integer | FieldKind::PositiveInteger => "integer".to_string(),
            FieldKind::BigInteger => "bigint".to_string(),
            FieldKind::SmallInteger | FieldKind::PositiveSmallInteger => "smallint".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::Char | FieldKind::Slug | FieldKind::Email => {
                format!("varchar({})", field.max_length.unwrap_or(255))
            }
            FieldKind::Text => "text".to_string(),
            FieldKind::Date => "date".to_string(),
            FieldKind::DateTime => "timestamp with time zone".to_string(),
            FieldKind::Time => "time".to_string(),
            FieldKind::Decimal => format!(
                "numeric({}, {})",
                field.max_digits.unwrap_or(10),
                field.decimal_places.unwrap_or(2)
            ),
            FieldKind::Float => "double precision".to_string(),
            FieldKind::ForeignKey | FieldKind::OneToOne | FieldKind::ManyToMany => "integer".to_string(),
        }
    }

    fn auto_primary_key(&self) -> &'static str {
        "serial NOT NULL PRIMARY KEY"
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    fn add_column(
        &self,
        model: &ModelSignature,
        field_name: &str,
        field: &FieldSignature,
        initial: Option<&InitialValue>,
    ) -> Vec<String> {
        let Some(column) = field.column(field_name) else {
            return Vec::new();
        };
        let table = self.quote_name(&model.meta.db_table);
        let quoted = self.quote_name(&column);

        let mut sql = vec![format!(
            "ALTER TABLE {table} ADD COLUMN {quoted} {} NULL;",
            self.column_type(field)
        )];
        if let Some(initial) = initial {
            sql.push(format!("UPDATE {table} SET {quoted} = {};", self.literal(initial)));
        }
        if !field.nullable {
            sql.push(format!("ALTER TABLE {table} ALTER COLUMN {quoted} SET NOT NULL;"));
        }
        if field.unique {
            sql.extend(self.create_index(model, field_name, field, true));
        }
        sql
    }

    fn drop_column(&self, model: &ModelSignature, field_name: &str, field: &FieldSignature) -> Vec<String> {
        let Some(column) = field.column(field_name) else {
            return Vec::new();
        };
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {} CASCADE;",
            self.quote_name(&model.meta.db_table),
            self.quote_name(&column)
        )]
    }

    fn change_nullable(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        let column = change
            .new_field
            .column(change.field_name)
            .ok_or_else(|| change.not_implemented(self.name(), Attribute::Nullable))?;
        let table = self.quote_name(&change.model.meta.db_table);
        let quoted = self.quote_name(&column);

        if change.new_field.nullable {
            return Ok(vec![format!("ALTER TABLE {table} ALTER COLUMN {quoted} DROP NOT NULL;")]);
        }
        let mut sql = Vec::new();
        if let Some(initial) = change.initial {
            sql.push(format!(
                "UPDATE {table} SET {quoted} = {} WHERE {quoted} IS NULL;",
                self.literal(initial)
            ));
        }
        sql.push(format!("ALTER TABLE {table} ALTER COLUMN {quoted} SET NOT NULL;"));
        Ok(sql)
    }

    fn change_max_length(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        let column = change
            .new_field
            .column(change.field_name)
            .ok_or_else(|| change.not_implemented(self.name(), Attribute::MaxLength))?;
        let quoted = self.quote_name(&column);
        let ty = self.column_type(change.new_field);
        Ok(vec![format!(
            "ALTER TABLE {} ALTER COLUMN {quoted} TYPE {ty} USING CAST({quoted} as {ty});",
            self.quote_name(&change.model.meta.db_table)
        )])
    }
}
