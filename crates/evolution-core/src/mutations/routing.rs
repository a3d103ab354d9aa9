//! Multi-store routing: which physical database a model lives in.

use std::collections::HashMap;

/// Name of the store used when no routing is configured.
pub const DEFAULT_DATABASE: &str = "default";

pub trait DatabaseRouter {
    /// Whether `app_label.model_name` should be evolved on `database`.
    fn allow_evolve(&self, database: &str, app_label: &str, model_name: &str) -> bool;
}

/// Every model lives in every store.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleDatabase;

impl DatabaseRouter for SingleDatabase {
    fn allow_evolve(&self, _database: &str, _app_label: &str, _model_name: &str) -> bool {
        true
    }
}

/// Table-driven router.  Model routes win over application routes, which
/// win over the default store.
#[derive(Clone, Debug)]
pub struct StaticRouter {
    default_database: String,
    routes: HashMap<String, String>,
}

impl StaticRouter {
    pub fn new(default_database: &str) -> Self {
        Self {
            default_database: default_database.to_string(),
            routes: HashMap::new(),
        }
    }

    pub fn route_app(mut self, app_label: &str, database: &str) -> Self {
        self.routes.insert(app_label.to_string(), database.to_string());
        self
    }

    pub fn route_model(mut self, app_label: &str, model_name: &str, database: &str) -> Self {
        self.routes
            .insert(format!("{app_label}.{model_name}"), database.to_string());
        self
    }

    /// Store that owns `app_label.model_name`.
    pub fn database_for(&self, app_label: &str, model_name: &str) -> &str {
        self.routes
            .get(&format!("{app_label}.{model_name}"))
            .or_else(|| self.routes.get(app_label))
            .unwrap_or(&self.default_database)
    }
}

impl DatabaseRouter for StaticRouter {
    fn allow_evolve(&self, database: &str, app_label: &str, model_name: &str) -> bool {
        self.database_for(app_label, model_name) == database
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_database_allows_everything() {
        assert!(SingleDatabase.allow_evolve("other", "blog", "Entry"));
    }

    #[test]
    fn test_static_router_precedence() {
        let router = StaticRouter::new("default")
            .route_app("analytics", "warehouse")
            .route_model("analytics", "Session", "default");
        assert_eq!(router.database_for("blog", "Entry"), "default");
        assert_eq!(router.database_for("analytics", "Hit"), "warehouse");
        assert_eq!(router.database_for("analytics", "Session"), "default");
        assert!(router.allow_evolve("warehouse", "analytics", "Hit"));
        assert!(!router.allow_evolve("default", "analytics", "Hit"));
    }
}
