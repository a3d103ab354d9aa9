//! Hint generation: turning a structural diff into mutation lists.
//!
//! Per model the order is fixed: one `AddField` per added field, then one
//! `DeleteField` per deleted field, then one `ChangeField` per changed field
//! bundling all of its changed attributes.  Whole-model deletions follow the
//! changed models as one `DeleteModel` each.  Added models and metadata
//! changes produce nothing; renames are never inferred.

use std::collections::BTreeMap;

use crate::models::InitialValue;
use crate::mutations::{AddField, ChangeField, DeleteField, DeleteModel, Mutation};

use super::{AppDiff, StructuralDiff};

impl StructuralDiff {
    /// Application label -> ordered mutations.  Applications without any
    /// generated mutation are omitted.
    pub fn evolution(&self) -> BTreeMap<String, Vec<Mutation>> {
        self.apps
            .iter()
            .filter_map(|(label, app)| {
                let mutations = app_evolution(app);
                (!mutations.is_empty()).then(|| (label.clone(), mutations))
            })
            .collect()
    }
}

fn app_evolution(app: &AppDiff) -> Vec<Mutation> {
    let mut mutations = Vec::new();

    for (model_name, model) in &app.changed_models {
        for (field_name, field) in &model.added_fields {
            let initial = field
                .requires_initial_value()
                .then_some(InitialValue::UserValueRequired);
            mutations.push(Mutation::AddField(AddField::new(
                model_name,
                field_name,
                field.clone(),
                initial,
            )));
        }
        for field_name in &model.deleted_fields {
            mutations.push(Mutation::DeleteField(DeleteField::new(model_name, field_name)));
        }
        for (field_name, changes) in &model.changed_fields {
            let mut change = ChangeField::new(model_name, field_name);
            for c in changes {
                change = change.set(c.attribute, c.new.clone());
            }
            mutations.push(Mutation::ChangeField(change));
        }
    }

    for model_name in &app.deleted_models {
        mutations.push(Mutation::DeleteModel(DeleteModel::new(model_name)));
    }

    mutations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::models::{Attribute, FieldKind, FieldSignature};
    use crate::mutations::simulator::{apply, SimulationOutcome};
    use crate::mutations::MutationContext;
    use crate::test_support::{base_project, project_with};

    fn rendered(target: &crate::models::ProjectSignature) -> Vec<String> {
        diff(&base_project(), target)
            .evolution()
            .get("tests")
            .map(|ms| ms.iter().map(|m| m.to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_hint_identical_is_empty() {
        assert!(diff(&base_project(), &base_project()).evolution().is_empty());
    }

    #[test]
    fn test_hint_add_field_requires_user_value() {
        let target = project_with(|m| {
            m.fields.insert("date_of_birth".into(), FieldSignature::new(FieldKind::Date));
        });
        assert_eq!(
            rendered(&target),
            vec![r#"AddField("TestModel", "date_of_birth", date, initial=<<USER VALUE REQUIRED>>)"#]
        );
    }

    #[test]
    fn test_hint_add_nullable_field_has_no_initial() {
        let target = project_with(|m| {
            m.fields.insert("nickname".into(), FieldSignature::new(FieldKind::Char).with_max_length(10).with_null());
        });
        assert_eq!(
            rendered(&target),
            vec![r#"AddField("TestModel", "nickname", char, nullable=true, max_length=10)"#]
        );
    }

    #[test]
    fn test_hint_delete_field() {
        let target = project_with(|m| {
            m.fields.shift_remove("age");
        });
        assert_eq!(rendered(&target), vec![r#"DeleteField("TestModel", "age")"#]);
    }

    #[test]
    fn test_hint_rename_is_add_plus_delete() {
        let target = project_with(|m| {
            let name = m.fields.shift_remove("name").unwrap();
            m.fields.insert("full_name".into(), name);
        });
        let hints = diff(&base_project(), &target).evolution();
        let mutations = &hints["tests"];
        assert_eq!(mutations.len(), 2);
        assert!(matches!(mutations[0], Mutation::AddField(_)));
        assert!(matches!(mutations[1], Mutation::DeleteField(_)));
        assert!(!mutations.iter().any(|m| matches!(m, Mutation::RenameField(_))));
        assert_eq!(
            rendered(&target),
            vec![
                r#"AddField("TestModel", "full_name", char, max_length=20, initial=<<USER VALUE REQUIRED>>)"#,
                r#"DeleteField("TestModel", "name")"#,
            ]
        );
    }

    #[test]
    fn test_hint_change_field_max_length() {
        let target = project_with(|m| {
            m.field_mut("name").unwrap().max_length = Some(30);
        });
        assert_eq!(
            rendered(&target),
            vec![r#"ChangeField("TestModel", "name", initial=null, max_length=30)"#]
        );
    }

    #[test]
    fn test_hint_bundles_changed_attributes() {
        let target = project_with(|m| {
            let name = m.field_mut("name").unwrap();
            name.max_length = Some(40);
            name.nullable = true;
        });
        let hints = diff(&base_project(), &target).evolution();
        assert_eq!(hints["tests"].len(), 1);
        match &hints["tests"][0] {
            Mutation::ChangeField(change) => {
                assert_eq!(
                    change.changes.keys().copied().collect::<Vec<_>>(),
                    vec![Attribute::Nullable, Attribute::MaxLength]
                );
            }
            other => panic!("expected ChangeField, got {other}"),
        }
    }

    #[test]
    fn test_hint_deleted_model() {
        let mut target = base_project();
        target.app_mut("tests").unwrap().models.remove("TestModel");
        assert_eq!(rendered(&target), vec![r#"DeleteModel("TestModel")"#]);
    }

    #[test]
    fn test_hint_order_additions_before_deletions() {
        let target = project_with(|m| {
            m.fields.shift_remove("age");
            m.fields.insert("bio".into(), FieldSignature::new(FieldKind::Text).with_null());
            m.field_mut("name").unwrap().max_length = Some(25);
        });
        let hints = diff(&base_project(), &target).evolution();
        let kinds: Vec<&str> = hints["tests"]
            .iter()
            .map(|m| match m {
                Mutation::AddField(_) => "add",
                Mutation::DeleteField(_) => "delete",
                Mutation::ChangeField(_) => "change",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["add", "delete", "change"]);
    }

    #[test]
    fn test_hint_round_trip_simulation() {
        let targets = vec![
            project_with(|m| {
                m.fields.shift_remove("age");
            }),
            project_with(|m| {
                m.fields.insert("dob".into(), FieldSignature::new(FieldKind::Date));
            }),
            project_with(|m| {
                let name = m.field_mut("name").unwrap();
                name.max_length = Some(40);
                name.nullable = true;
            }),
            project_with(|m| {
                let name = m.fields.shift_remove("name").unwrap();
                m.fields.insert("full_name".into(), name);
                m.fields.insert(
                    "tags".into(),
                    FieldSignature::new(FieldKind::ManyToMany).with_related("tests.TestModel"),
                );
            }),
        ];

        for target in targets {
            let base = base_project();
            let hints = diff(&base, &target).evolution();
            let ctx = MutationContext::new("tests");
            let (simulated, outcome) = apply(&base, &ctx, &hints["tests"]);
            assert_eq!(outcome, SimulationOutcome::Verified);
            assert!(diff(&simulated, &target).is_empty(), "{}", diff(&simulated, &target));
        }
    }
}
