use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SchemaBackend;
use crate::errors::EvolutionResult;
use crate::models::ProjectSignature;

use super::delete_model::drop_model;
use super::MutationContext;

/// Remove every model of the context's application that lives in the
/// targeted store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteApplication {}

impl DeleteApplication {
    fn owned_models(ctx: &MutationContext<'_>, signature: &ProjectSignature) -> EvolutionResult<Vec<String>> {
        let app = signature
            .app(ctx.app_label)
            .ok_or_else(|| ctx.failure("Cannot delete an application that does not exist"))?;
        Ok(app.models.keys().filter(|name| ctx.owns(name)).cloned().collect())
    }

    pub fn simulate(&self, ctx: &MutationContext<'_>, signature: &mut ProjectSignature) -> EvolutionResult<()> {
        let owned = Self::owned_models(ctx, signature)?;
        if let Some(app) = signature.app_mut(ctx.app_label) {
            for name in &owned {
                app.models.remove(name);
            }
            if app.is_empty() {
                signature.apps.remove(ctx.app_label);
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
        let mut sql = Vec::new();
        for name in Self::owned_models(ctx, signature)? {
            sql.extend(drop_model(ctx.model(signature, &name)?, backend));
        }
        Ok(sql)
    }
}

impl fmt::Display for DeleteApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeleteApplication()")
    }
}
