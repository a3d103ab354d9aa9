//! Schema backends: translate mutations into engine-specific statements.
//!
//! [`SchemaBackend`] is the contract every engine implements.  Generic
//! statements (index management, renames, table drops, association tables)
//! have default implementations built from a handful of engine hooks;
//! engines override what their dialect does differently.  An attribute
//! change with no backend operation is reported as
//! [`EvolutionError::NotImplemented`], never skipped.

pub mod naming;
pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::errors::{EvolutionError, EvolutionResult};
use crate::models::{Attribute, FieldKind, FieldSignature, InitialValue, ModelSignature, USER_VALUE_REQUIRED};

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

// ---------------------------------------------------------------------------
// Operation inputs
// ---------------------------------------------------------------------------

/// Association table backing a many-to-many field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationTable {
    pub table: String,
    pub source_column: String,
    pub source_table: String,
    pub source_pk: String,
    pub source_type: String,
    pub target_column: String,
    pub target_table: String,
    pub target_pk: String,
    pub target_type: String,
}

/// One attribute change on one field, as seen by the backend.
#[derive(Clone, Copy, Debug)]
pub struct FieldChange<'a> {
    pub model_name: &'a str,
    /// Model as it stands before the change.
    pub model: &'a ModelSignature,
    pub field_name: &'a str,
    pub old_field: &'a FieldSignature,
    pub new_field: &'a FieldSignature,
    pub initial: Option<&'a InitialValue>,
}

impl FieldChange<'_> {
    /// Model as it stands after the change.
    pub fn model_after(&self) -> ModelSignature {
        let mut model = self.model.clone();
        if let Some(field) = model.fields.get_mut(self.field_name) {
            *field = self.new_field.clone();
        }
        model
    }

    pub fn not_implemented(&self, backend: &str, attribute: Attribute) -> EvolutionError {
        EvolutionError::NotImplemented {
            backend: backend.to_string(),
            model: self.model_name.to_string(),
            field: self.field_name.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

/// Copy of `model` with `field_name` removed and stripped from every
/// unique-together tuple.
pub fn model_without(model: &ModelSignature, field_name: &str) -> ModelSignature {
    let mut model = model.clone();
    model.fields.shift_remove(field_name);
    for tuple in &mut model.meta.unique_together {
        tuple.retain(|name| name != field_name);
    }
    model.meta.unique_together.retain(|tuple| !tuple.is_empty());
    model
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

pub trait SchemaBackend {
    fn name(&self) -> &'static str;

    /// Longest identifier the engine accepts, if bounded.
    fn max_name_length(&self) -> Option<usize>;

    /// Column type of `field`.
    fn column_type(&self, field: &FieldSignature) -> String;

    /// Definition of an auto-incrementing primary key column (after the name).
    fn auto_primary_key(&self) -> &'static str;

    fn bool_literal(&self, value: bool) -> &'static str;

    fn add_column(
        &self,
        model: &ModelSignature,
        field_name: &str,
        field: &FieldSignature,
        initial: Option<&InitialValue>,
    ) -> Vec<String>;

    fn drop_column(&self, model: &ModelSignature, field_name: &str, field: &FieldSignature) -> Vec<String>;

    fn quote_name(&self, name: &str) -> String {
        naming::quote_identifier(name)
    }

    fn truncate_name(&self, name: &str) -> String {
        naming::truncate_name(name, self.max_name_length())
    }

    /// Column type of a foreign key pointing at `pk`.
    fn reference_type(&self, pk: &FieldSignature) -> String {
        match pk.kind {
            FieldKind::Auto => "integer".to_string(),
            FieldKind::BigAuto => "bigint".to_string(),
            _ => self.column_type(pk),
        }
    }

    fn literal(&self, value: &InitialValue) -> String {
        match value {
            InitialValue::UserValueRequired => USER_VALUE_REQUIRED.to_string(),
            InitialValue::Literal(Value::Null) => "NULL".to_string(),
            InitialValue::Literal(Value::Bool(b)) => self.bool_literal(*b).to_string(),
            InitialValue::Literal(Value::Number(n)) => n.to_string(),
            InitialValue::Literal(Value::String(s)) => naming::quote_literal(s),
            InitialValue::Literal(other) => naming::quote_literal(&other.to_string()),
        }
    }

    /// Association table of a many-to-many field on `model`.
    fn m2m_table(&self, model: &ModelSignature, field_name: &str, field: &FieldSignature) -> String {
        match &field.db_table {
            Some(table) => table.clone(),
            None => self.truncate_name(&naming::default_m2m_table(&model.meta.db_table, field_name)),
        }
    }

    /// `"column" type [NOT] NULL [PRIMARY KEY]`, or `None` for fields without
    /// a column.
    fn column_definition(&self, field_name: &str, field: &FieldSignature) -> Option<String> {
        let column = self.quote_name(&field.column(field_name)?);
        if field.primary_key && field.kind.is_auto() {
            return Some(format!("{column} {}", self.auto_primary_key()));
        }
        let null = if field.nullable { "NULL" } else { "NOT NULL" };
        let pk = if field.primary_key { " PRIMARY KEY" } else { "" };
        Some(format!("{column} {} {null}{pk}", self.column_type(field)))
    }

    /// `CREATE TABLE` for `model` alone, without its indexes.
    fn table_definition(&self, model: &ModelSignature) -> String {
        let mut parts: Vec<String> = model
            .fields
            .iter()
            .filter_map(|(name, field)| self.column_definition(name, field))
            .collect();
        for tuple in model.meta.unique_together_set() {
            let columns: Vec<String> = tuple
                .iter()
                .filter_map(|name| model.field(name).and_then(|f| f.column(name)))
                .map(|column| self.quote_name(&column))
                .collect();
            parts.push(format!("UNIQUE ({})", columns.join(", ")));
        }
        format!(
            "CREATE TABLE {} ({});",
            self.quote_name(&model.meta.db_table),
            parts.join(", ")
        )
    }

    /// Index statements for every indexed or unique non-key column.
    fn index_statements(&self, model: &ModelSignature) -> Vec<String> {
        let mut sql = Vec::new();
        for (name, field) in &model.fields {
            if field.primary_key {
                continue;
            }
            if field.unique {
                sql.extend(self.create_index(model, name, field, true));
            } else if field.indexed && field.kind.traits().supports_index {
                sql.extend(self.create_index(model, name, field, false));
            }
        }
        sql
    }

    fn create_table(&self, model: &ModelSignature) -> Vec<String> {
        let mut sql = vec![self.table_definition(model)];
        sql.extend(self.index_statements(model));
        sql
    }

    fn create_index(
        &self,
        model: &ModelSignature,
        field_name: &str,
        field: &FieldSignature,
        unique: bool,
    ) -> Vec<String> {
        let Some(column) = field.column(field_name) else {
            return Vec::new();
        };
        let table = &model.meta.db_table;
        let index = naming::index_name(table, &column, unique, self.max_name_length());
        vec![format!(
            "CREATE {}INDEX {} ON {} ({});",
            if unique { "UNIQUE " } else { "" },
            self.quote_name(&index),
            self.quote_name(table),
            self.quote_name(&column)
        )]
    }

    fn drop_index(
        &self,
        model: &ModelSignature,
        field_name: &str,
        field: &FieldSignature,
        unique: bool,
    ) -> Vec<String> {
        let Some(column) = field.column(field_name) else {
            return Vec::new();
        };
        let index = naming::index_name(&model.meta.db_table, &column, unique, self.max_name_length());
        vec![format!("DROP INDEX {};", self.quote_name(&index))]
    }

    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE {};", self.quote_name(table))]
    }

    fn add_table(&self, table: &AssociationTable) -> Vec<String> {
        let reference = |column: &str, ty: &str, target: &str, pk: &str| {
            format!(
                "{} {ty} NOT NULL REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
                self.quote_name(column),
                self.quote_name(target),
                self.quote_name(pk)
            )
        };
        vec![format!(
            "CREATE TABLE {} ({} {}, {}, {}, UNIQUE ({}, {}));",
            self.quote_name(&table.table),
            self.quote_name("id"),
            self.auto_primary_key(),
            reference(&table.source_column, &table.source_type, &table.source_table, &table.source_pk),
            reference(&table.target_column, &table.target_type, &table.target_table, &table.target_pk),
            self.quote_name(&table.source_column),
            self.quote_name(&table.target_column),
        )]
    }

    fn rename_table(&self, old_table: &str, new_table: &str) -> Vec<String> {
        if old_table == new_table {
            return Vec::new();
        }
        vec![format!(
            "ALTER TABLE {} RENAME TO {};",
            self.quote_name(old_table),
            self.quote_name(new_table)
        )]
    }

    fn rename_column(&self, model: &ModelSignature, old_column: &str, new_column: &str) -> Vec<String> {
        if old_column == new_column {
            return Vec::new();
        }
        vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            self.quote_name(&model.meta.db_table),
            self.quote_name(old_column),
            self.quote_name(new_column)
        )]
    }

    // -- attribute changes --------------------------------------------------

    fn change_nullable(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        Err(change.not_implemented(self.name(), Attribute::Nullable))
    }

    fn change_max_length(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        Err(change.not_implemented(self.name(), Attribute::MaxLength))
    }

    fn change_column_name(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        match (
            change.old_field.column(change.field_name),
            change.new_field.column(change.field_name),
        ) {
            (Some(old), Some(new)) => Ok(self.rename_column(change.model, &old, &new)),
            _ => Err(change.not_implemented(self.name(), Attribute::ColumnName)),
        }
    }

    fn change_db_table(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        if !change.new_field.kind.is_many_to_many() {
            return Err(change.not_implemented(self.name(), Attribute::DbTable));
        }
        let old = self.m2m_table(change.model, change.field_name, change.old_field);
        let new = self.m2m_table(change.model, change.field_name, change.new_field);
        Ok(self.rename_table(&old, &new))
    }

    fn change_indexed(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        Ok(if change.new_field.indexed {
            self.create_index(change.model, change.field_name, change.new_field, false)
        } else {
            self.drop_index(change.model, change.field_name, change.old_field, false)
        })
    }

    fn change_unique(&self, change: &FieldChange<'_>) -> EvolutionResult<Vec<String>> {
        Ok(if change.new_field.unique {
            self.create_index(change.model, change.field_name, change.new_field, true)
        } else {
            self.drop_index(change.model, change.field_name, change.old_field, true)
        })
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    pub fn backend(self) -> Box<dyn SchemaBackend> {
        match self {
            BackendKind::Sqlite => Box::new(SqliteBackend),
            BackendKind::Postgres => Box::new(PostgresBackend),
        }
    }
}

impl FromStr for BackendKind {
    type Err = EvolutionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "postgresql" | "postgres" => Ok(BackendKind::Postgres),
            other => Err(EvolutionError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgresql",
        })
    }
}
