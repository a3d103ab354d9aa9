//! Environment-driven configuration.

use std::path::PathBuf;

use crate::backend::BackendKind;
use crate::errors::EvolutionResult;
use crate::mutations::DEFAULT_DATABASE;

pub const ENV_DATABASE: &str = "EVOLUTION_DATABASE";
pub const ENV_SCRIPTS: &str = "EVOLUTION_SCRIPTS";
pub const ENV_MODELS: &str = "EVOLUTION_MODELS";
pub const ENV_BACKEND: &str = "EVOLUTION_BACKEND";
pub const ENV_DATABASE_ALIAS: &str = "EVOLUTION_DATABASE_ALIAS";
pub const ENV_NONINTERACTIVE: &str = "EVOLUTION_NONINTERACTIVE";

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn flag_enabled(raw: &str) -> bool {
    let v = raw.trim().to_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "on")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvolveConfig {
    /// SQLite file holding the live schema and the history tables.
    pub database_path: PathBuf,
    /// Root of the stored evolution scripts.
    pub scripts_dir: PathBuf,
    /// JSON project signature describing the current models.
    pub models_path: PathBuf,
    pub backend: BackendKind,
    /// Physical store name used for routing.
    pub database_alias: String,
    pub noninteractive: bool,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./evolution.db"),
            scripts_dir: PathBuf::from("./evolutions"),
            models_path: PathBuf::from("./models.json"),
            backend: BackendKind::Sqlite,
            database_alias: DEFAULT_DATABASE.to_string(),
            noninteractive: false,
        }
    }
}

impl EvolveConfig {
    pub fn from_env() -> EvolutionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> EvolutionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get(ENV_DATABASE) {
            config.database_path = expand_tilde(path.trim());
        }
        if let Some(path) = get(ENV_SCRIPTS) {
            config.scripts_dir = expand_tilde(path.trim());
        }
        if let Some(path) = get(ENV_MODELS) {
            config.models_path = expand_tilde(path.trim());
        }
        if let Some(raw) = get(ENV_BACKEND) {
            config.backend = raw.parse()?;
        }
        if let Some(alias) = get(ENV_DATABASE_ALIAS) {
            config.database_alias = alias.trim().to_string();
        }
        if let Some(raw) = get(ENV_NONINTERACTIVE) {
            config.noninteractive = flag_enabled(&raw);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EvolveConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EvolveConfig::default());
        assert_eq!(config.database_alias, "default");
    }

    #[test]
    fn test_overrides() {
        let config = EvolveConfig::from_lookup(lookup(&[
            (ENV_DATABASE, "/tmp/app.db"),
            (ENV_SCRIPTS, " /srv/evolutions "),
            (ENV_BACKEND, "Postgres"),
            (ENV_DATABASE_ALIAS, "warehouse"),
            (ENV_NONINTERACTIVE, "Yes"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/app.db"));
        assert_eq!(config.scripts_dir, PathBuf::from("/srv/evolutions"));
        assert_eq!(config.backend, BackendKind::Postgres);
        assert_eq!(config.database_alias, "warehouse");
        assert!(config.noninteractive);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = EvolveConfig::from_lookup(lookup(&[(ENV_BACKEND, "  ")])).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
    }

    #[test]
    fn test_unknown_backend_is_error() {
        assert!(EvolveConfig::from_lookup(lookup(&[(ENV_BACKEND, "oracle")])).is_err());
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
