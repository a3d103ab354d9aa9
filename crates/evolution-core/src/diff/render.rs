//! Human-readable rendering of a [`StructuralDiff`].

use std::fmt;

use super::{AppDiff, StructuralDiff};

impl fmt::Display for StructuralDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (app_label, app) in &self.apps {
            write_app(f, app_label, app)?;
        }
        Ok(())
    }
}

fn write_app(f: &mut fmt::Formatter<'_>, app_label: &str, app: &AppDiff) -> fmt::Result {
    for model_name in &app.deleted_models {
        writeln!(f, "The model {app_label}.{model_name} has been deleted")?;
    }
    for model_name in app.added_models.keys() {
        writeln!(f, "The model {app_label}.{model_name} has been added")?;
    }
    for (model_name, model) in &app.changed_models {
        writeln!(f, "In model {app_label}.{model_name}:")?;
        for field_name in model.added_fields.keys() {
            writeln!(f, "    Field '{field_name}' has been added")?;
        }
        for field_name in &model.deleted_fields {
            writeln!(f, "    Field '{field_name}' has been deleted")?;
        }
        for (field_name, changes) in &model.changed_fields {
            writeln!(f, "    In field '{field_name}':")?;
            for change in changes {
                writeln!(
                    f,
                    "        Property '{}' has changed ({} -> {})",
                    change.attribute, change.old, change.new
                )?;
            }
        }
        for change in &model.meta_changes {
            writeln!(
                f,
                "    Meta property '{}' has changed ({} -> {})",
                change.property, change.old, change.new
            )?;
        }
    }
    Ok(())
}
