//! Stored evolution scripts.
//!
//! On disk a script is `<root>/<app_label>/<label>.json` holding
//! `{"mutations": [...]}`.  Scripts of an application run in the order given
//! by `<root>/<app_label>/sequence` (one label per line, `#` starts a
//! comment), or in lexical label order when that file is absent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{EvolutionError, EvolutionResult};
use crate::mutations::Mutation;

/// Name of the optional ordering file inside an application directory.
pub const SEQUENCE_FILE: &str = "sequence";

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_\-]*$").expect("valid label regex"));

pub fn is_valid_label(label: &str) -> bool {
    LABEL_RE.is_match(label)
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvolutionScript {
    pub label: String,
    pub mutations: Vec<Mutation>,
}

#[derive(Serialize, Deserialize)]
struct ScriptFile {
    mutations: Vec<Mutation>,
}

/// Pretty JSON script body for `mutations`, loadable as a stored script.
pub fn render_script(mutations: &[Mutation]) -> EvolutionResult<String> {
    Ok(serde_json::to_string_pretty(&ScriptFile {
        mutations: mutations.to_vec(),
    })?)
}

pub fn parse_script(label: &str, raw: &str) -> EvolutionResult<EvolutionScript> {
    let file: ScriptFile = serde_json::from_str(raw).map_err(|e| EvolutionError::InvalidScript {
        label: label.to_string(),
        message: e.to_string(),
    })?;
    Ok(EvolutionScript {
        label: label.to_string(),
        mutations: file.mutations,
    })
}

pub trait ScriptSource {
    /// Every script label of `app_label`, in execution order.
    fn sequence(&self, app_label: &str) -> EvolutionResult<Vec<String>>;

    fn load(&self, app_label: &str, label: &str) -> EvolutionResult<EvolutionScript>;
}

/// Labels in `app_label`'s sequence not yet in `applied`, in order.
pub fn unapplied_evolutions(
    source: &dyn ScriptSource,
    app_label: &str,
    applied: &BTreeSet<String>,
) -> EvolutionResult<Vec<String>> {
    Ok(source
        .sequence(app_label)?
        .into_iter()
        .filter(|label| !applied.contains(label))
        .collect())
}

// ---------------------------------------------------------------------------
// Directory-backed scripts
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct DirectoryScripts {
    root: PathBuf,
}

impl DirectoryScripts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn app_dir(&self, app_label: &str) -> PathBuf {
        self.root.join(app_label)
    }

    fn read_sequence_file(path: &Path) -> EvolutionResult<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        let mut labels = Vec::new();
        for line in raw.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if !is_valid_label(line) {
                return Err(EvolutionError::InvalidScript {
                    label: line.to_string(),
                    message: format!("invalid label in {}", path.display()),
                });
            }
            labels.push(line.to_string());
        }
        Ok(labels)
    }
}

impl ScriptSource for DirectoryScripts {
    fn sequence(&self, app_label: &str) -> EvolutionResult<Vec<String>> {
        let dir = self.app_dir(app_label);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let sequence_path = dir.join(SEQUENCE_FILE);
        if sequence_path.is_file() {
            return Self::read_sequence_file(&sequence_path);
        }

        let mut labels = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_label(stem) {
                    labels.push(stem.to_string());
                } else {
                    debug!(path = %path.display(), "skipping file with invalid label");
                }
            }
        }
        labels.sort();
        Ok(labels)
    }

    fn load(&self, app_label: &str, label: &str) -> EvolutionResult<EvolutionScript> {
        if !is_valid_label(label) {
            return Err(EvolutionError::InvalidScript {
                label: label.to_string(),
                message: "invalid label".to_string(),
            });
        }
        let path = self.app_dir(app_label).join(format!("{label}.json"));
        let raw = std::fs::read_to_string(&path).map_err(|e| EvolutionError::InvalidScript {
            label: format!("{app_label}.{label}"),
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        parse_script(&format!("{app_label}.{label}"), &raw)
    }
}

// ---------------------------------------------------------------------------
// In-memory scripts
// ---------------------------------------------------------------------------

/// Scripts held in memory, in insertion order per application.
#[derive(Clone, Debug, Default)]
pub struct InMemoryScripts {
    scripts: BTreeMap<String, Vec<EvolutionScript>>,
}

impl InMemoryScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, app_label: &str, label: &str, mutations: Vec<Mutation>) -> Self {
        self.scripts
            .entry(app_label.to_string())
            .or_default()
            .push(EvolutionScript {
                label: label.to_string(),
                mutations,
            });
        self
    }
}

impl ScriptSource for InMemoryScripts {
    fn sequence(&self, app_label: &str) -> EvolutionResult<Vec<String>> {
        Ok(self
            .scripts
            .get(app_label)
            .map(|scripts| scripts.iter().map(|s| s.label.clone()).collect())
            .unwrap_or_default())
    }

    fn load(&self, app_label: &str, label: &str) -> EvolutionResult<EvolutionScript> {
        self.scripts
            .get(app_label)
            .and_then(|scripts| scripts.iter().find(|s| s.label == label))
            .cloned()
            .ok_or_else(|| EvolutionError::InvalidScript {
                label: format!("{app_label}.{label}"),
                message: "no such script".to_string(),
            })
    }
}
