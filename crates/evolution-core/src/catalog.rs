//! Model catalog: the source of the current target signature.
//!
//! The pipeline never inspects live model classes.  Whatever owns the
//! models describes them through [`ModelCatalog`], and
//! [`project_signature`] assembles and validates the full signature.

use std::path::Path;

use tracing::debug;

use crate::errors::{EvolutionError, EvolutionResult};
use crate::models::{ApplicationSignature, ModelSignature, ProjectSignature};

pub trait ModelCatalog {
    fn app_labels(&self) -> Vec<String>;

    fn model_names(&self, app_label: &str) -> Vec<String>;

    fn describe(&self, app_label: &str, model_name: &str) -> EvolutionResult<ModelSignature>;
}

/// Build the project signature described by `catalog`.
pub fn project_signature(catalog: &dyn ModelCatalog) -> EvolutionResult<ProjectSignature> {
    let mut signature = ProjectSignature::new();
    for app_label in catalog.app_labels() {
        let mut app = ApplicationSignature::new();
        for model_name in catalog.model_names(&app_label) {
            let model = catalog.describe(&app_label, &model_name)?;
            app.models.insert(model_name, model);
        }
        debug!(app = app_label.as_str(), models = app.models.len(), "described application");
        signature.apps.insert(app_label, app);
    }
    signature.validate()?;
    Ok(signature)
}

/// Catalog backed by an already-built signature, typically loaded from a
/// JSON models file.
#[derive(Clone, Debug, Default)]
pub struct SignatureCatalog {
    signature: ProjectSignature,
}

impl SignatureCatalog {
    pub fn new(signature: ProjectSignature) -> Self {
        Self { signature }
    }

    /// Load from a versioned JSON signature file.
    pub fn from_path(path: &Path) -> EvolutionResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::new(ProjectSignature::from_json(&raw)?))
    }
}

impl ModelCatalog for SignatureCatalog {
    fn app_labels(&self) -> Vec<String> {
        self.signature.app_labels()
    }

    fn model_names(&self, app_label: &str) -> Vec<String> {
        self.signature
            .app(app_label)
            .map(|app| app.models.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn describe(&self, app_label: &str, model_name: &str) -> EvolutionResult<ModelSignature> {
        self.signature
            .model(app_label, model_name)
            .cloned()
            .ok_or_else(|| EvolutionError::InvalidSignature(format!("unknown model {app_label}.{model_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldKind, FieldSignature};
    use crate::test_support::base_project;

    #[test]
    fn test_project_signature_from_catalog() {
        let catalog = SignatureCatalog::new(base_project());
        assert_eq!(project_signature(&catalog).unwrap(), base_project());
    }

    #[test]
    fn test_project_signature_validates() {
        let mut sig = base_project();
        sig.insert_model(
            "tests",
            "NoKey",
            ModelSignature::new("tests_nokey").with_field("name", FieldSignature::new(FieldKind::Text)),
        );
        let err = project_signature(&SignatureCatalog::new(sig)).unwrap_err();
        assert!(matches!(err, EvolutionError::InvalidSignature(_)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, base_project().to_json().unwrap()).unwrap();
        let catalog = SignatureCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.model_names("tests"), vec!["TestModel"]);
        assert!(catalog.describe("tests", "Missing").is_err());
    }
}
