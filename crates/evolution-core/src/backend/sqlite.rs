//! SQLite statement generation.
//!
//! SQLite cannot alter a column in place, so column drops and nullability or
//! width changes rebuild the table: create a copy with the new shape, copy
//! the rows across, drop the original and rename the copy into place.

use std::collections::HashSet;

use crate::errors::EvolutionResult;
use crate::models::{FieldKind, FieldSignature, InitialValue, ModelSignature};

use super::{model_without, FieldChange, SchemaBackend};

/// Suffix of the scratch table used during a rebuild.
const REBUILD_SUFFIX: &str = "__evolve";

#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    /// Replace the table of `before` with one shaped like `after`, copying
    /// every column present in both.  `fill` substitutes a literal for NULLs
    /// in one column while copying.
    fn rebuild(&self, before: &ModelSignature, after: &ModelSignature, fill: Option<(&str, String)>) -> Vec<String> {
        let table = &before.meta.db_table;
        let scratch = format!("{table}{REBUILD_SUFFIX}");

        let mut scratch_model = after.clone();
        scratch_model.meta.db_table = scratch.clone();

        let existing: HashSet<String> = before
            .fields
            .iter()
            .filter_map(|(name, field)| field.column(name))
            .collect();

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for (name, field) in &after.fields {
            let Some(column) = field.column(name) else {
                continue;
            };
            if !existing.contains(&column) {
                continue;
            }
            let quoted = self.quote_name(&column);
            let source = match &fill {
                Some((filled, literal)) if *filled == column => format!("COALESCE({quoted}, {literal})"),
                _ => quoted.clone(),
            };
            targets.push(quoted);
            sources.push(source);
        }

        let mut sql = vec![
            self.table_definition(&scratch_model),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {};",
                self.quote_name(&scratch),
                targets.join(", "),
                sources.join(", "),
                self.quote_name(table)
            ),
            format!("DROP TABLE {};", self.quote_name(table)),
            format!(
                "ALTER TABLE {} RENAME TO {};",
                self.quote_name(&scratch),
                self.quote_name(table)
            ),
        ];
        sql.extend(self.index_statements(after));
        sql
    }
}

impl SchemaBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn max_name_length(&self) -> Option<usize> {
        None
    }

    fn column_type(&self, field: &FieldSignature) -> String {
        match field.kind {
            FieldKind::Auto | FieldKind::BigAuto | FieldKind::Integer => "integer".to_string(),
            FieldKind::BigInteger => "bigint".to_string(),
            FieldKind::SmallInteger => "smallint".to_string(),
            FieldKind::PositiveInteger => "integer unsigned".to_string(),
            FieldKind::PositiveSmallInteger => "smallint unsigned".to_string(),
            FieldKind::Boolean => "bool".to_string(),
            FieldKind::Char | FieldKind::Slug | FieldKind::Email => {
                format!("varchar({})", field.max_length.unwrap_or(255))
            }
            FieldKind::Text => "text".to_string(),
            FieldKind::Date => "date".to_string(),
            FieldKind::DateTime => "datetime".to_string(),
            FieldKind::Time => "time".to_string(),
            FieldKind::Decimal => "decimal".to_string(),
            FieldKind::Float => "real".to_string(),
            FieldKind::ForeignKey | FieldKind::OneToOne | FieldKind::ManyToMany => "integer".to_string(),
        }
    }

    fn auto_primary_key(&self) -> &'static str {
        "integer NOT NULL PRIMARY KEY AUTOINCREMENT"
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
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
        let ty = self.column_type(field);

        let mut sql = Vec::new();
        if field.nullable {
            sql.push(format!("ALTER TABLE {table} ADD COLUMN {quoted} {ty} NULL;"));
            if let Some(initial) = initial {
                sql.push(format!("UPDATE {table} SET {quoted} = {};", self.literal(initial)));
            }
        } else {
            match initial {
                Some(initial) => sql.push(format!(
                    "ALTER TABLE {table} ADD COLUMN {quoted} {ty} NOT NULL DEFAULT {};",
                    self.literal(initial)
                )),
                None => sql.push(format!("ALTER TABLE {table} ADD COLUMN {quoted} {ty} NOT NULL;")),
            }
        }
        if field.unique {
            sql.extend(self.create_index(model, field_name, field, true));
        }
        sql
    }

    fn drop_column(&self, model: &ModelSignature, field_name: &str, _field: &FieldSignature) -> Vec<String> {
        self.rebuild(model, &model_without(model, field_name), None)
    }

    fn change_nullable(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        let fill = match (change.new_field.nullable, change.initial, change.new_field.column(change.field_name)) {
            (false, Some(initial), Some(column)) => Some((column, self.literal(initial))),
            _ => None,
        };
        Ok(self.rebuild(
            change.model,
            &change.model_after(),
            fill.as_ref().map(|(column, literal)| (column.as_str(), literal.clone())),
        ))
    }

    fn change_max_length(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        Ok(self.rebuild(change.model, &change.model_after(), None))
    }
}
