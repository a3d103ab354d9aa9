//! Structural diff between two project signatures.
//!
//! [`diff`] is a pure function: identical inputs always produce identical
//! output, because every collection it emits is ordered lexically by name.

pub mod hint;
pub mod render;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::models::{
    ApplicationSignature, Attribute, FieldSignature, ModelMeta, ModelSignature, ProjectSignature,
};

/// Old and new value of one changed attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: Attribute,
    pub old: Value,
    pub new: Value,
}

/// Old and new value of one changed metadata property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaChange {
    pub property: &'static str,
    pub old: Value,
    pub new: Value,
}

/// Differences inside a model present on both sides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelDiff {
    pub added_fields: BTreeMap<String, FieldSignature>,
    pub deleted_fields: BTreeSet<String>,
    /// Field name -> changed attributes, in attribute catalogue order.
    pub changed_fields: BTreeMap<String, Vec<AttributeChange>>,
    pub meta_changes: Vec<MetaChange>,
}

impl ModelDiff {
    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty()
            && self.deleted_fields.is_empty()
            && self.changed_fields.is_empty()
            && self.meta_changes.is_empty()
    }

    pub fn meta_changed(&self) -> bool {
        !self.meta_changes.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppDiff {
    pub changed_models: BTreeMap<String, ModelDiff>,
    pub added_models: BTreeMap<String, ModelSignature>,
    pub deleted_models: BTreeSet<String>,
}

impl AppDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_models.is_empty() && self.added_models.is_empty() && self.deleted_models.is_empty()
    }
}

/// Per-application, per-model differences between two signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuralDiff {
    pub apps: BTreeMap<String, AppDiff>,
}

impl StructuralDiff {
    pub fn is_empty(&self) -> bool {
        self.apps.values().all(AppDiff::is_empty)
    }

    pub fn app(&self, app_label: &str) -> Option<&AppDiff> {
        self.apps.get(app_label)
    }

    /// Copy of the diff limited to the given applications.
    pub fn restricted_to(&self, app_labels: &[String]) -> StructuralDiff {
        StructuralDiff {
            apps: self
                .apps
                .iter()
                .filter(|(label, _)| app_labels.contains(label))
                .map(|(label, app)| (label.clone(), app.clone()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Algorithm
// ---------------------------------------------------------------------------

/// Compare `old` against `new`.
pub fn diff(old: &ProjectSignature, new: &ProjectSignature) -> StructuralDiff {
    let empty = ApplicationSignature::default();
    let labels: BTreeSet<&String> = old.apps.keys().chain(new.apps.keys()).collect();

    let mut result = StructuralDiff::default();
    for label in labels {
        let old_app = old.apps.get(label).unwrap_or(&empty);
        let new_app = new.apps.get(label).unwrap_or(&empty);
        let app_diff = diff_app(old_app, new_app);
        if !app_diff.is_empty() {
            result.apps.insert(label.clone(), app_diff);
        }
    }
    result
}

fn diff_app(old: &ApplicationSignature, new: &ApplicationSignature) -> AppDiff {
    let names: BTreeSet<&String> = old.models.keys().chain(new.models.keys()).collect();

    let mut app_diff = AppDiff::default();
    for name in names {
        match (old.models.get(name), new.models.get(name)) {
            (Some(_), None) => {
                app_diff.deleted_models.insert(name.clone());
            }
            (None, Some(model)) => {
                app_diff.added_models.insert(name.clone(), model.clone());
            }
            (Some(old_model), Some(new_model)) => {
                let model_diff = diff_model(old_model, new_model);
                if !model_diff.is_empty() {
                    app_diff.changed_models.insert(name.clone(), model_diff);
                }
            }
            (None, None) => {}
        }
    }
    app_diff
}

fn diff_model(old: &ModelSignature, new: &ModelSignature) -> ModelDiff {
    let mut model_diff = ModelDiff::default();

    for (name, field) in &new.fields {
        match old.fields.get(name) {
            None => {
                model_diff.added_fields.insert(name.clone(), field.clone());
            }
            Some(old_field) => {
                let changes = diff_field(old_field, field);
                if !changes.is_empty() {
                    model_diff.changed_fields.insert(name.clone(), changes);
                }
            }
        }
    }
    for name in old.fields.keys() {
        if !new.fields.contains_key(name) {
            model_diff.deleted_fields.insert(name.clone());
        }
    }

    model_diff.meta_changes = diff_meta(&old.meta, &new.meta);
    model_diff
}

/// Attribute-by-attribute comparison.  Unset attributes read as their
/// default, so an explicit default never registers as a change.
pub fn diff_field(old: &FieldSignature, new: &FieldSignature) -> Vec<AttributeChange> {
    Attribute::ALL
        .iter()
        .filter_map(|&attribute| {
            let old_value = old.attribute(attribute);
            let new_value = new.attribute(attribute);
            (old_value != new_value).then_some(AttributeChange {
                attribute,
                old: old_value,
                new: new_value,
            })
        })
        .collect()
}

fn diff_meta(old: &ModelMeta, new: &ModelMeta) -> Vec<MetaChange> {
    fn opt(value: &Option<String>) -> Value {
        value.clone().map(Value::String).unwrap_or(Value::Null)
    }
    fn tuples(meta: &ModelMeta) -> Value {
        Value::from(
            meta.unique_together_set()
                .into_iter()
                .map(Value::from)
                .collect::<Vec<_>>(),
        )
    }

    let mut changes = Vec::new();
    let mut compare = |property: &'static str, old: Value, new: Value| {
        if old != new {
            changes.push(MetaChange { property, old, new });
        }
    };
    compare(
        "db_table",
        Value::from(old.db_table.clone()),
        Value::from(new.db_table.clone()),
    );
    compare("db_tablespace", opt(&old.db_tablespace), opt(&new.db_tablespace));
    compare(
        "pk_column",
        Value::from(old.pk_column.clone()),
        Value::from(new.pk_column.clone()),
    );
    compare("unique_together", tuples(old), tuples(new));
    changes
}
