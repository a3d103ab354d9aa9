use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{FieldChange, SchemaBackend};
use crate::errors::EvolutionResult;
use crate::models::{Attribute, InitialValue, ProjectSignature};

use super::MutationContext;

/// Change one or more attributes of an existing field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeField {
    pub model_name: String,
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<InitialValue>,
    /// New attribute values, applied in catalogue order.
    pub changes: BTreeMap<Attribute, Value>,
}

impl ChangeField {
    pub fn new(model_name: &str, field_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            field_name: field_name.to_string(),
            initial: None,
            changes: BTreeMap::new(),
        }
    }

    pub fn set(mut self, attribute: Attribute, value: Value) -> Self {
        self.changes.insert(attribute, value);
        self
    }

    pub fn with_initial(mut self, initial: InitialValue) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        let model = ctx.model_mut(signature, &self.model_name)?;
        let failure = |message: &str| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        };

        if self.changes.get(&Attribute::Nullable) == Some(&Value::Bool(false)) && self.initial.is_none() {
            return Err(failure("Cannot change column to not null without a non-null initial value").into());
        }

        let Some(field) = model.fields.get_mut(&self.field_name) else {
            return Err(failure("Cannot change a field that does not exist").into());
        };
        let mut changed = field.clone();
        for (attribute, value) in &self.changes {
            changed
                .set_attribute(*attribute, value)
                .map_err(|message| failure(&message))?;
        }
        *field = changed;

        let pk_column = model.primary_key_field().and_then(|(name, field)| field.column(name));
        if let Some(column) = pk_column {
            model.meta.pk_column = column;
        }
        Ok(())
    }

    /// One backend operation per changed attribute.  Each operation sees the
    /// field as left by the previous one.
    pub fn mutate(
        &self,
        ctx: &MutationContext<'_>,
        signature: &ProjectSignature,
        backend: &dyn SchemaBackend,
    ) -> EvolutionResult<Vec<String>> {
        let failure = |message: &str| {
            ctx.failure(message)
                .in_model(&self.model_name)
                .in_field(&self.field_name)
        };
        let mut model = ctx.model(signature, &self.model_name)?.clone();
        if !model.fields.contains_key(&self.field_name) {
            return Err(failure("Cannot change a field that does not exist").into());
        }

        let mut sql = Vec::new();
        for (attribute, value) in &self.changes {
            let Some(old_field) = model.field(&self.field_name).cloned() else {
                break;
            };
            let mut new_field = old_field.clone();
            new_field
                .set_attribute(*attribute, value)
                .map_err(|message| failure(&message))?;
            if new_field == old_field {
                continue;
            }

            let change = FieldChange {
                model_name: &self.model_name,
                model: &model,
                field_name: &self.field_name,
                old_field: &old_field,
                new_field: &new_field,
                initial: self.initial.as_ref(),
            };
            let statements = match attribute {
                Attribute::Nullable => backend.change_nullable(&change)?,
                Attribute::MaxLength => backend.change_max_length(&change)?,
                Attribute::ColumnName => backend.change_column_name(&change)?,
                Attribute::DbTable => backend.change_db_table(&change)?,
                Attribute::Indexed => backend.change_indexed(&change)?,
                Attribute::Unique => backend.change_unique(&change)?,
                other => return Err(change.not_implemented(backend.name(), *other)),
            };
            sql.extend(statements);

            if let Some(field) = model.fields.get_mut(&self.field_name) {
                *field = new_field;
            }
        }
        Ok(sql)
    }
}

impl fmt::Display for ChangeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeField(\"{}\", \"{}\", initial=", self.model_name, self.field_name)?;
        match &self.initial {
            Some(initial) => write!(f, "{initial}")?,
            None => f.write_str("null")?,
        }
        for (attribute, value) in &self.changes {
            write!(f, ", {attribute}={value}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PostgresBackend, SqliteBackend};
    use crate::diff::diff;
    use crate::errors::EvolutionError;
    use crate::models::{FieldKind, FieldSignature};
    use crate::test_support::{base_project, project_with};

    #[test]
    fn test_change_to_not_null_without_initial_fails() {
        let mut sig = project_with(|m| m.field_mut("age").unwrap().nullable = true);
        let err = ChangeField::new("TestModel", "age")
            .set(Attribute::Nullable, Value::Bool(false))
            .simulate(&MutationContext::new("tests"), &mut sig)
            .unwrap_err();
        assert!(matches!(err, EvolutionError::Simulation(_)));
    }

    #[test]
    fn test_change_two_attributes_matches_target() {
        let mut sig = base_project();
        ChangeField::new("TestModel", "name")
            .set(Attribute::MaxLength, Value::from(40))
            .set(Attribute::Nullable, Value::Bool(true))
            .simulate(&MutationContext::new("tests"), &mut sig)
            .unwrap();
        let target = project_with(|m| {
            let name = m.field_mut("name").unwrap();
            name.max_length = Some(40);
            name.nullable = true;
        });
        assert!(diff(&sig, &target).is_empty());
    }

    #[test]
    fn test_change_rejects_bad_value() {
        let mut sig = base_project();
        let err = ChangeField::new("TestModel", "name")
            .set(Attribute::MaxLength, Value::from("wide"))
            .simulate(&MutationContext::new("tests"), &mut sig)
            .unwrap_err();
        assert!(err.to_string().contains("max_length"));
    }

    #[test]
    fn test_change_unknown_field_fails() {
        let mut sig = base_project();
        assert!(ChangeField::new("TestModel", "missing")
            .set(Attribute::Indexed, Value::Bool(true))
            .simulate(&MutationContext::new("tests"), &mut sig)
            .is_err());
    }

    #[test]
    fn test_mutate_dispatches_per_attribute() {
        let sql = ChangeField::new("TestModel", "name")
            .set(Attribute::Indexed, Value::Bool(true))
            .set(Attribute::MaxLength, Value::from(30))
            .mutate(&MutationContext::new("tests"), &base_project(), &PostgresBackend)
            .unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE INDEX \"tests_testmodel_name\" ON \"tests_testmodel\" (\"name\");",
                "ALTER TABLE \"tests_testmodel\" ALTER COLUMN \"name\" TYPE varchar(30) \
                 USING CAST(\"name\" as varchar(30));",
            ]
        );
    }

    #[test]
    fn test_mutate_unsupported_attribute_is_not_implemented() {
        let err = ChangeField::new("TestModel", "age")
            .set(Attribute::Kind, Value::from("big_integer"))
            .mutate(&MutationContext::new("tests"), &base_project(), &SqliteBackend)
            .unwrap_err();
        match err {
            EvolutionError::NotImplemented { attribute, field, .. } => {
                assert_eq!(attribute, "kind");
                assert_eq!(field, "age");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_mutate_column_name_and_db_table() {
        let sig = project_with(|m| {
            m.fields.insert(
                "friends".into(),
                FieldSignature::new(FieldKind::ManyToMany).with_related("tests.TestModel"),
            );
        });
        let ctx = MutationContext::new("tests");
        let sql = ChangeField::new("TestModel", "age")
            .set(Attribute::ColumnName, Value::from("years"))
            .mutate(&ctx, &sig, &SqliteBackend)
            .unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE \"tests_testmodel\" RENAME COLUMN \"age\" TO \"years\";"]
        );

        let sql = ChangeField::new("TestModel", "friends")
            .set(Attribute::DbTable, Value::from("tests_friendship"))
            .mutate(&ctx, &sig, &SqliteBackend)
            .unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE \"tests_testmodel_friends\" RENAME TO \"tests_friendship\";"]
        );
    }

    #[test]
    fn test_mutate_unchanged_value_is_skipped() {
        let sql = ChangeField::new("TestModel", "name")
            .set(Attribute::MaxLength, Value::from(20))
            .mutate(&MutationContext::new("tests"), &base_project(), &SqliteBackend)
            .unwrap();
        assert!(sql.is_empty());
    }

    #[test]
    fn test_display_with_initial() {
        let mutation = ChangeField::new("TestModel", "age")
            .set(Attribute::Nullable, Value::Bool(false))
            .with_initial(InitialValue::Literal(Value::from(0)));
        assert_eq!(
            mutation.to_string(),
            r#"ChangeField("TestModel", "age", initial=0, nullable=false)"#
        );
    }
}
