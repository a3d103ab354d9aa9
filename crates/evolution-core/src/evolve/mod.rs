//! The evolve pipeline.
//!
//! One [`Evolver::run`] walks `Collecting → Simulating → Verifying →
//! (Executing | Reporting) → Done`, moving to `Aborted` on the first error.
//! Nothing touches the physical database before `Executing`, and `Executing`
//! is a single transaction.

pub mod prompt;
pub mod scripts;

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::backend::SchemaBackend;
use crate::diff;
use crate::errors::{EvolutionError, EvolutionResult};
use crate::models::ProjectSignature;
use crate::mutations::simulator::{simulate_step, StepOutcome};
use crate::mutations::{DatabaseRouter, Mutation, MutationContext, SingleDatabase, DEFAULT_DATABASE};
use crate::store::Database;

pub use prompt::{AlwaysProceed, Confirm, Confirmation, ReaderPrompt};
pub use scripts::{
    render_script, unapplied_evolutions, DirectoryScripts, EvolutionScript, InMemoryScripts, ScriptSource,
};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvolveStage {
    Collecting,
    Simulating,
    Verifying,
    Executing,
    Reporting,
    Done,
    Aborted,
}

impl EvolveStage {
    pub fn can_advance_to(self, next: EvolveStage) -> bool {
        use EvolveStage::*;
        match (self, next) {
            (Done | Aborted, _) => false,
            (_, Aborted) => true,
            (Collecting, Simulating)
            | (Simulating, Verifying)
            | (Verifying, Executing)
            | (Verifying, Reporting)
            | (Executing, Done)
            | (Reporting, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EvolveStage::Done | EvolveStage::Aborted)
    }
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct EvolveOptions {
    /// Applications to evolve.  Empty means every known application.
    pub app_labels: Vec<String>,
    /// Generate mutations from the signature diff instead of stored scripts.
    pub hint: bool,
    pub execute: bool,
    /// Ask for confirmation before executing.
    pub interactive: bool,
}

/// Work planned for one application.
#[derive(Clone, Debug, PartialEq)]
pub struct AppEvolution {
    pub app_label: String,
    /// Script labels applied by this run, empty in hint mode.
    pub labels: Vec<String>,
    pub mutations: Vec<Mutation>,
    pub statements: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvolveOutcome {
    /// Nothing to do.
    UpToDate,
    /// Simulated and verified; no statement executed.
    Trial,
    Executed { version_id: i64 },
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvolveReport {
    pub apps: Vec<AppEvolution>,
    /// Rendered mutations that could not be simulated.
    pub unverified: Vec<String>,
    pub outcome: EvolveOutcome,
}

impl EvolveReport {
    pub fn is_verified(&self) -> bool {
        self.unverified.is_empty()
    }

    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.apps.iter().flat_map(|app| app.statements.iter().map(String::as_str))
    }

    /// The pending plan per application: compiled statements when `sql` is
    /// set, otherwise the mutations as a loadable script body.
    pub fn render_plan(&self, sql: bool) -> EvolutionResult<String> {
        let mut out = String::new();
        for app in &self.apps {
            if sql {
                out.push_str(&format!(";; Compiled evolution SQL for {}\n", app.app_label));
                for statement in &app.statements {
                    out.push_str(statement);
                    out.push('\n');
                }
            } else {
                out.push_str(&format!("#----- Evolution for {}\n", app.app_label));
                out.push_str(&render_script(&app.mutations)?);
                out.push_str("\n#----------------------\n");
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Evolver
// ---------------------------------------------------------------------------

pub struct Evolver<'a> {
    database: &'a Database,
    backend: &'a dyn SchemaBackend,
    scripts: &'a dyn ScriptSource,
    database_alias: &'a str,
    router: &'a dyn DatabaseRouter,
    stage: EvolveStage,
}

impl<'a> Evolver<'a> {
    pub fn new(database: &'a Database, backend: &'a dyn SchemaBackend, scripts: &'a dyn ScriptSource) -> Self {
        Self {
            database,
            backend,
            scripts,
            database_alias: DEFAULT_DATABASE,
            router: &SingleDatabase,
            stage: EvolveStage::Collecting,
        }
    }

    /// Evolve the physical store `alias`, letting `router` decide which
    /// models live there.
    pub fn with_router(mut self, alias: &'a str, router: &'a dyn DatabaseRouter) -> Self {
        self.database_alias = alias;
        self.router = router;
        self
    }

    pub fn stage(&self) -> EvolveStage {
        self.stage
    }

    fn advance(&mut self, next: EvolveStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "invalid stage transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(from = ?self.stage, to = ?next, "evolve stage");
        self.stage = next;
    }

    /// Store `current` as the first Version, marking every known script
    /// label as applied.  Executes nothing.
    pub fn install_baseline(&self, current: &ProjectSignature) -> EvolutionResult<i64> {
        self.database.init_schema()?;
        if self.database.latest_version()?.is_some() {
            return Err(EvolutionError::Config(
                "An evolution baseline already exists.".to_string(),
            ));
        }
        let mut labels = Vec::new();
        for app_label in current.app_labels() {
            for label in self.scripts.sequence(&app_label)? {
                labels.push((app_label.clone(), label));
            }
        }
        self.database.record_baseline(current, &labels)
    }

    /// Run the pipeline against the target signature `current`.
    pub fn run(
        &mut self,
        current: &ProjectSignature,
        options: &EvolveOptions,
        prompt: &mut dyn Confirm,
    ) -> EvolutionResult<EvolveReport> {
        self.stage = EvolveStage::Collecting;
        let result = self.run_stages(current, options, prompt);
        if result.is_err() && !self.stage.is_terminal() {
            self.advance(EvolveStage::Aborted);
        }
        result
    }

    fn run_stages(
        &mut self,
        current: &ProjectSignature,
        options: &EvolveOptions,
        prompt: &mut dyn Confirm,
    ) -> EvolutionResult<EvolveReport> {
        if options.execute && !options.app_labels.is_empty() {
            return Err(EvolutionError::Config(
                "Cannot specify an application name when executing evolutions.".to_string(),
            ));
        }

        self.database.init_schema()?;
        let baseline = self.database.latest_version()?.ok_or(EvolutionError::NoBaseline)?;
        let targets = target_apps(&baseline.signature, current, &options.app_labels)?;
        info!(apps = targets.len(), hint = options.hint, execute = options.execute, "evolve started");

        // Collecting
        let mut apps = self.collect(&baseline.signature, current, &targets, options.hint)?;
        if options.execute {
            if let Some(mutation) = apps
                .iter()
                .flat_map(|app| app.mutations.iter())
                .find(|m| m.requires_user_value())
            {
                return Err(EvolutionError::UserValueRequired(mutation.to_string()));
            }
        }

        // Simulating
        self.advance(EvolveStage::Simulating);
        let mut working = baseline.signature.clone();
        adopt_added_models(&mut working, current, &targets);
        let mut unverified = Vec::new();
        for app in &mut apps {
            self.simulate_app(app, &mut working, &mut unverified)?;
        }

        // Verifying
        self.advance(EvolveStage::Verifying);
        if unverified.is_empty() {
            let remaining = diff::diff(&working, current).restricted_to(&targets);
            if !remaining.is_empty() {
                return Err(EvolutionError::VerificationFailed(remaining.to_string()));
            }
            debug!("post-simulation signature matches target");
        } else {
            warn!(
                count = unverified.len(),
                "evolution could not be fully verified; raw SQL mutations were not simulated"
            );
        }

        let nothing_to_do = apps.iter().all(|app| app.mutations.is_empty() && app.labels.is_empty());
        if nothing_to_do {
            self.advance(EvolveStage::Reporting);
            self.advance(EvolveStage::Done);
            info!("no evolution required");
            return Ok(EvolveReport { apps, unverified, outcome: EvolveOutcome::UpToDate });
        }

        if !options.execute {
            self.advance(EvolveStage::Reporting);
            self.advance(EvolveStage::Done);
            info!("trial evolution successful");
            return Ok(EvolveReport { apps, unverified, outcome: EvolveOutcome::Trial });
        }

        // Executing
        self.advance(EvolveStage::Executing);
        if options.interactive {
            let database = self.database.db_path().display().to_string();
            if prompt.confirm(&database)? == Confirmation::Cancel {
                self.advance(EvolveStage::Done);
                info!("evolution cancelled");
                return Ok(EvolveReport { apps, unverified, outcome: EvolveOutcome::Cancelled });
            }
        }

        let statements: Vec<String> = apps.iter().flat_map(|app| app.statements.iter().cloned()).collect();
        let labels: Vec<(String, String)> = apps
            .iter()
            .flat_map(|app| app.labels.iter().map(|label| (app.app_label.clone(), label.clone())))
            .collect();
        let version_id = self.database.apply_evolution(&statements, current, &labels)?;
        self.advance(EvolveStage::Done);
        info!(version_id, statements = statements.len(), "evolution successful");
        Ok(EvolveReport {
            apps,
            unverified,
            outcome: EvolveOutcome::Executed { version_id },
        })
    }

    /// Mutation lists per targeted application, from hints or unapplied
    /// scripts.  Applications with nothing pending are left out.
    fn collect(
        &self,
        baseline: &ProjectSignature,
        current: &ProjectSignature,
        targets: &[String],
        hint: bool,
    ) -> EvolutionResult<Vec<AppEvolution>> {
        let mut hinted = if hint {
            diff::diff(baseline, current).restricted_to(targets).evolution()
        } else {
            Default::default()
        };

        let mut apps = Vec::new();
        for app_label in targets {
            let (labels, mutations) = if hint {
                (Vec::new(), hinted.remove(app_label).unwrap_or_default())
            } else {
                let applied = self.database.applied_evolutions(app_label)?;
                let pending = unapplied_evolutions(self.scripts, app_label, &applied)?;
                let mut mutations = Vec::new();
                for label in &pending {
                    let script = self.scripts.load(app_label, label)?;
                    debug!(app = app_label.as_str(), label = label.as_str(), count = script.mutations.len(), "loaded script");
                    mutations.extend(script.mutations);
                }
                (pending, mutations)
            };
            if labels.is_empty() && mutations.is_empty() {
                continue;
            }
            apps.push(AppEvolution {
                app_label: app_label.clone(),
                labels,
                mutations,
                statements: Vec::new(),
            });
        }
        Ok(apps)
    }

    /// Replay `app`'s mutations on `working`, collecting statements from
    /// each mutation against the signature it sees.
    fn simulate_app(
        &self,
        app: &mut AppEvolution,
        working: &mut ProjectSignature,
        unverified: &mut Vec<String>,
    ) -> EvolutionResult<()> {
        let ctx = MutationContext::new(&app.app_label).with_database(self.database_alias, self.router);
        for mutation in &app.mutations {
            let before = working.clone();
            match simulate_step(mutation, &ctx, working)? {
                StepOutcome::Applied => {}
                StepOutcome::Unverified => {
                    warn!(app = app.app_label.as_str(), mutation = %mutation, "mutation cannot be simulated");
                    unverified.push(mutation.to_string());
                }
            }
            if !mutation.is_mutable(&ctx) {
                debug!(app = app.app_label.as_str(), mutation = %mutation, "not routed to this database");
                continue;
            }
            let statements = mutation
                .mutate(&ctx, &before, self.backend)
                .map_err(|e| match e {
                    EvolutionError::Simulation(failure) => {
                        EvolutionError::Simulation(failure.with_mutation(mutation.to_string()))
                    }
                    other => other,
                })?;
            app.statements.extend(statements);
        }
        Ok(())
    }
}

/// Targeted application labels, sorted.  Explicit labels must exist in the
/// baseline or the target.
fn target_apps(
    baseline: &ProjectSignature,
    current: &ProjectSignature,
    requested: &[String],
) -> EvolutionResult<Vec<String>> {
    let known: BTreeSet<String> = baseline
        .app_labels()
        .into_iter()
        .chain(current.app_labels())
        .collect();
    if requested.is_empty() {
        return Ok(known.into_iter().collect());
    }
    let mut targets = BTreeSet::new();
    for label in requested {
        if !known.contains(label) {
            return Err(EvolutionError::UnknownApplication(label.clone()));
        }
        targets.insert(label.clone());
    }
    Ok(targets.into_iter().collect())
}

/// Copy models present in the target but absent from `working` for the
/// targeted applications.  Their tables are created outside the pipeline.
fn adopt_added_models(working: &mut ProjectSignature, current: &ProjectSignature, targets: &[String]) {
    for app_label in targets {
        let Some(app) = current.app(app_label) else {
            continue;
        };
        for (model_name, model) in &app.models {
            if working.model(app_label, model_name).is_none() {
                debug!(app = app_label.as_str(), model = model_name.as_str(), "adopting added model");
                working.insert_model(app_label, model_name, model.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite::SqliteBackend;
    use crate::models::{Attribute, FieldKind, FieldSignature, InitialValue, ModelSignature};
    use crate::mutations::{AddField, ChangeField, DeleteField, RawSql, StaticRouter};
    use crate::test_support::{anchor, base_model, base_project, project_with};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
    }

    /// A database whose live schema and baseline both match `base_project`.
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("evolution.db")).unwrap();
        db.init_schema().unwrap();
        let conn = db.connect().unwrap();
        for statement in SqliteBackend.create_table(&base_model()) {
            conn.execute_batch(&statement).unwrap();
        }
        conn.execute_batch("INSERT INTO \"tests_testmodel\" (\"name\", \"age\") VALUES ('a', 1);")
            .unwrap();
        db.record_baseline(&base_project(), &[]).unwrap();
        Fixture { _dir: dir, db }
    }

    fn columns(db: &Database) -> Vec<String> {
        table_columns(db, "tests_testmodel")
    }

    fn table_columns(db: &Database, table: &str) -> Vec<String> {
        let conn = db.connect().unwrap();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")")).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn hint(execute: bool) -> EvolveOptions {
        EvolveOptions { hint: true, execute, ..Default::default() }
    }

    fn scripted(execute: bool) -> EvolveOptions {
        EvolveOptions { execute, ..Default::default() }
    }

    fn without_age() -> ProjectSignature {
        project_with(|model| {
            model.fields.shift_remove("age");
        })
    }

    #[test]
    fn test_stage_transitions() {
        use EvolveStage::*;
        assert!(Collecting.can_advance_to(Simulating));
        assert!(Verifying.can_advance_to(Reporting));
        assert!(Verifying.can_advance_to(Executing));
        assert!(Simulating.can_advance_to(Aborted));
        assert!(!Collecting.can_advance_to(Executing));
        assert!(!Done.can_advance_to(Aborted));
        assert!(!Aborted.can_advance_to(Collecting));
    }

    #[test]
    fn test_requires_baseline() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("empty.db")).unwrap();
        let scripts = InMemoryScripts::new();
        let mut evolver = Evolver::new(&db, &SqliteBackend, &scripts);
        let err = evolver.run(&base_project(), &hint(false), &mut AlwaysProceed).unwrap_err();
        assert!(matches!(err, EvolutionError::NoBaseline));
        assert_eq!(evolver.stage(), EvolveStage::Aborted);
    }

    #[test]
    fn test_execute_with_labels_is_rejected() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let options = EvolveOptions {
            app_labels: vec!["tests".to_string()],
            execute: true,
            ..Default::default()
        };
        let err = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&base_project(), &options, &mut AlwaysProceed)
            .unwrap_err();
        assert!(matches!(err, EvolutionError::Config(_)));
    }

    #[test]
    fn test_unknown_application() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let options = EvolveOptions { app_labels: vec!["nope".to_string()], ..Default::default() };
        let err = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&base_project(), &options, &mut AlwaysProceed)
            .unwrap_err();
        assert!(matches!(err, EvolutionError::UnknownApplication(label) if label == "nope"));
    }

    #[test]
    fn test_up_to_date() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let mut evolver = Evolver::new(&fx.db, &SqliteBackend, &scripts);
        let report = evolver.run(&base_project(), &hint(true), &mut AlwaysProceed).unwrap();
        assert_eq!(report.outcome, EvolveOutcome::UpToDate);
        assert_eq!(evolver.stage(), EvolveStage::Done);
        assert_eq!(fx.db.versions().unwrap().len(), 1);
    }

    #[test]
    fn test_hint_trial_touches_nothing() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&without_age(), &hint(false), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(report.outcome, EvolveOutcome::Trial);
        assert_eq!(
            report.apps[0].mutations,
            vec![Mutation::DeleteField(DeleteField::new("TestModel", "age"))]
        );
        assert!(report.statements().count() > 0);
        assert_eq!(columns(&fx.db), vec!["id", "name", "age"]);
        assert_eq!(fx.db.versions().unwrap().len(), 1);
    }

    #[test]
    fn test_hint_execute_applies_and_records() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let target = without_age();
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &hint(true), &mut AlwaysProceed)
            .unwrap();
        let EvolveOutcome::Executed { version_id } = report.outcome else {
            panic!("expected execution, got {:?}", report.outcome);
        };
        assert_eq!(columns(&fx.db), vec!["id", "name"]);
        let latest = fx.db.latest_version().unwrap().unwrap();
        assert_eq!(latest.id, version_id);
        assert_eq!(latest.signature, target);
    }

    #[test]
    fn test_scripts_are_recorded_once() {
        let fx = fixture();
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_drop_age",
            vec![Mutation::DeleteField(DeleteField::new("TestModel", "age"))],
        );
        let target = without_age();

        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        assert!(matches!(report.outcome, EvolveOutcome::Executed { .. }));
        assert_eq!(
            fx.db.applied_evolutions("tests").unwrap().into_iter().collect::<Vec<_>>(),
            vec!["0001_drop_age"]
        );

        let again = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(again.outcome, EvolveOutcome::UpToDate);
    }

    #[test]
    fn test_verification_failure_aborts() {
        let fx = fixture();
        // The script drops `age` but the target still has it.
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_drop_age",
            vec![Mutation::DeleteField(DeleteField::new("TestModel", "age"))],
        );
        let mut evolver = Evolver::new(&fx.db, &SqliteBackend, &scripts);
        let err = evolver
            .run(&base_project(), &scripted(true), &mut AlwaysProceed)
            .unwrap_err();
        match err {
            EvolutionError::VerificationFailed(text) => assert!(text.contains("Field 'age' has been added")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(evolver.stage(), EvolveStage::Aborted);
        assert_eq!(columns(&fx.db), vec!["id", "name", "age"]);
        assert!(fx.db.applied_evolutions("tests").unwrap().is_empty());
    }

    #[test]
    fn test_simulation_failure_aborts() {
        let fx = fixture();
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_drop_pk",
            vec![Mutation::DeleteField(DeleteField::new("TestModel", "id"))],
        );
        let err = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&base_project(), &scripted(false), &mut AlwaysProceed)
            .unwrap_err();
        match err {
            EvolutionError::Simulation(failure) => {
                assert_eq!(failure.message, "Cannot delete a primary key");
                assert!(failure.mutation.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_raw_sql_is_unverified() {
        let fx = fixture();
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_raw",
            vec![Mutation::RawSql(RawSql::new(vec![
                "ALTER TABLE \"tests_testmodel\" ADD COLUMN \"note\" text NULL".to_string(),
            ]))],
        );
        let target = project_with(|model| {
            model.fields.insert("note".to_string(), FieldSignature::new(FieldKind::Text).with_null());
        });
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        assert!(!report.is_verified());
        assert!(matches!(report.outcome, EvolveOutcome::Executed { .. }));
        assert_eq!(columns(&fx.db), vec!["id", "name", "age", "note"]);
    }

    #[test]
    fn test_placeholder_blocks_execution() {
        let fx = fixture();
        let target = project_with(|model| {
            model.fields.insert("rank".to_string(), FieldSignature::new(FieldKind::Integer));
        });
        let scripts = InMemoryScripts::new();

        let trial = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &hint(false), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(trial.outcome, EvolveOutcome::Trial);
        assert!(trial.apps[0].mutations[0].requires_user_value());

        let err = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &hint(true), &mut AlwaysProceed)
            .unwrap_err();
        assert!(matches!(err, EvolutionError::UserValueRequired(_)));
    }

    #[test]
    fn test_add_field_with_initial_value() {
        let fx = fixture();
        let target = project_with(|model| {
            model.fields.insert("rank".to_string(), FieldSignature::new(FieldKind::Integer));
        });
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_rank",
            vec![Mutation::AddField(AddField::new(
                "TestModel",
                "rank",
                FieldSignature::new(FieldKind::Integer),
                Some(InitialValue::Literal(json!(7))),
            ))],
        );
        Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        let rank: i64 = fx
            .db
            .connect()
            .unwrap()
            .query_row("SELECT \"rank\" FROM \"tests_testmodel\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rank, 7);
    }

    #[test]
    fn test_failing_statement_rolls_back() {
        let fx = fixture();
        let target = project_with(|model| {
            let name = model.fields.get_mut("name").unwrap();
            name.max_length = Some(40);
        });
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_widen",
            vec![
                Mutation::ChangeField(ChangeField::new("TestModel", "name").set(Attribute::MaxLength, json!(40))),
                Mutation::RawSql(RawSql::new(vec!["SELECT * FROM missing_table".to_string()])),
            ],
        );
        let err = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &scripted(true), &mut AlwaysProceed)
            .unwrap_err();
        assert!(matches!(err, EvolutionError::Execution { .. }));
        assert_eq!(fx.db.versions().unwrap().len(), 1);
        assert!(fx.db.applied_evolutions("tests").unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_prompt_executes_nothing() {
        let fx = fixture();
        let scripts = InMemoryScripts::new();
        let options = EvolveOptions { interactive: true, ..hint(true) };
        let mut output = Vec::new();
        let mut prompt = ReaderPrompt::new("no\n".as_bytes(), &mut output);
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&without_age(), &options, &mut prompt)
            .unwrap();
        assert_eq!(report.outcome, EvolveOutcome::Cancelled);
        assert_eq!(columns(&fx.db), vec!["id", "name", "age"]);
    }

    #[test]
    fn test_added_model_is_adopted() {
        let fx = fixture();
        let mut target = base_project();
        target.insert_model(
            "tests",
            "Other",
            ModelSignature::new("tests_other").with_field("id", FieldSignature::new(FieldKind::Auto).with_primary_key()),
        );
        let scripts = InMemoryScripts::new();
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&target, &hint(false), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(report.outcome, EvolveOutcome::UpToDate);
    }

    #[test]
    fn test_unrouted_model_emits_no_statements() {
        let fx = fixture();
        let router = StaticRouter::new("default").route_model("tests", "TestModel", "archive");
        let scripts = InMemoryScripts::new();
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .with_router("default", &router)
            .run(&without_age(), &hint(false), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(report.outcome, EvolveOutcome::Trial);
        assert_eq!(report.statements().count(), 0);
    }

    #[test]
    fn test_install_baseline_marks_scripts_applied() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("fresh.db")).unwrap();
        let scripts = InMemoryScripts::new()
            .with_script("tests", "0001", vec![])
            .with_script("tests", "0002", vec![]);
        let evolver = Evolver::new(&db, &SqliteBackend, &scripts);
        evolver.install_baseline(&base_project()).unwrap();
        assert_eq!(db.applied_evolutions("tests").unwrap().len(), 2);
        assert!(evolver.install_baseline(&base_project()).is_err());
    }

    #[test]
    fn test_rebuild_keeps_populated_association_rows() {
        let fx = fixture();
        let friends = FieldSignature::new(FieldKind::ManyToMany).with_related("tests.TestModel");
        let with_friends = project_with(|model| {
            model.fields.insert("friends".to_string(), friends.clone());
        });
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_friends",
            vec![Mutation::AddField(AddField::new("TestModel", "friends", friends.clone(), None))],
        );
        Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&with_friends, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        fx.db
            .connect()
            .unwrap()
            .execute_batch(
                "INSERT INTO \"tests_testmodel_friends\" (\"from_testmodel_id\", \"to_testmodel_id\") VALUES (1, 1);",
            )
            .unwrap();

        let widened = project_with(|model| {
            model.fields.insert("friends".to_string(), friends.clone());
            model.fields.get_mut("name").unwrap().max_length = Some(40);
        });
        let scripts = scripts.with_script(
            "tests",
            "0002_widen",
            vec![Mutation::ChangeField(
                ChangeField::new("TestModel", "name").set(Attribute::MaxLength, json!(40)),
            )],
        );
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&widened, &scripted(true), &mut AlwaysProceed)
            .unwrap();
        assert!(matches!(report.outcome, EvolveOutcome::Executed { .. }));

        let conn = fx.db.connect().unwrap();
        let linked: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM \"tests_testmodel_friends\" f \
                 JOIN \"tests_testmodel\" t ON t.\"id\" = f.\"from_testmodel_id\"",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(linked, 1);
        assert_eq!(columns(&fx.db), vec!["id", "name", "age"]);
        assert_eq!(fx.db.latest_version().unwrap().unwrap().signature, widened);
    }

    #[test]
    fn test_simulation_failure_in_later_app_halts_all_apps() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("evolution.db")).unwrap();
        db.init_schema().unwrap();
        let mut baseline = base_project();
        baseline.insert_model("blog", "Entry", anchor("blog_entry"));
        let conn = db.connect().unwrap();
        for statement in SqliteBackend
            .create_table(&base_model())
            .into_iter()
            .chain(SqliteBackend.create_table(&anchor("blog_entry")))
        {
            conn.execute_batch(&statement).unwrap();
        }
        db.record_baseline(&baseline, &[]).unwrap();

        let mut target = baseline.clone();
        target.model_mut("blog", "Entry").unwrap().fields.shift_remove("value");
        let scripts = InMemoryScripts::new()
            .with_script(
                "blog",
                "0001_drop_value",
                vec![Mutation::DeleteField(DeleteField::new("Entry", "value"))],
            )
            .with_script(
                "tests",
                "0001_drop_pk",
                vec![Mutation::DeleteField(DeleteField::new("TestModel", "id"))],
            );

        let mut evolver = Evolver::new(&db, &SqliteBackend, &scripts);
        let err = evolver.run(&target, &scripted(true), &mut AlwaysProceed).unwrap_err();
        match err {
            EvolutionError::Simulation(failure) => assert_eq!(failure.app_label, "tests"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(evolver.stage(), EvolveStage::Aborted);
        assert_eq!(table_columns(&db, "blog_entry"), vec!["id", "value"]);
        assert_eq!(columns(&db), vec!["id", "name", "age"]);
        assert_eq!(db.versions().unwrap().len(), 1);
        assert!(db.applied_evolutions("blog").unwrap().is_empty());
    }

    #[test]
    fn test_newer_store_format_is_refused() {
        let fx = fixture();
        fx.db
            .connect()
            .unwrap()
            .execute_batch("UPDATE evolution_meta SET value = '99' WHERE key = 'store_format';")
            .unwrap();
        let scripts = InMemoryScripts::new();
        let mut evolver = Evolver::new(&fx.db, &SqliteBackend, &scripts);
        let err = evolver.run(&without_age(), &hint(true), &mut AlwaysProceed).unwrap_err();
        assert!(matches!(err, EvolutionError::UnsupportedStore { found: 99, .. }));
        assert_eq!(evolver.stage(), EvolveStage::Aborted);
        assert_eq!(columns(&fx.db), vec!["id", "name", "age"]);
    }

    #[test]
    fn test_scripted_trial_plan_lists_mutations() {
        let fx = fixture();
        let scripts = InMemoryScripts::new().with_script(
            "tests",
            "0001_drop_age",
            vec![Mutation::DeleteField(DeleteField::new("TestModel", "age"))],
        );
        let report = Evolver::new(&fx.db, &SqliteBackend, &scripts)
            .run(&without_age(), &scripted(false), &mut AlwaysProceed)
            .unwrap();
        assert_eq!(report.outcome, EvolveOutcome::Trial);

        let plan = report.render_plan(false).unwrap();
        assert!(plan.starts_with("#----- Evolution for tests\n"));
        assert!(plan.contains("\"delete_field\""));
        assert!(plan.contains("\"age\""));

        let sql = report.render_plan(true).unwrap();
        assert!(sql.starts_with(";; Compiled evolution SQL for tests\n"));
        assert!(sql.contains("DROP TABLE \"tests_testmodel\";"));
    }
}
