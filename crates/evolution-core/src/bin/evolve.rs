use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use evolution_core::backend::BackendKind;
use evolution_core::catalog::{project_signature, SignatureCatalog};
use evolution_core::config::{expand_tilde, EvolveConfig};
use evolution_core::evolve::{
    DirectoryScripts, EvolveOptions, EvolveOutcome, EvolveReport, Evolver, ReaderPrompt,
};
use evolution_core::mutations::SingleDatabase;
use evolution_core::store::Database;

#[derive(Parser, Debug)]
#[command(name = "evolve")]
#[command(about = "Evolve the database schema to match the current models")]
struct Cli {
    /// Applications to evolve (default: all known applications).
    app_labels: Vec<String>,

    /// Generate the evolution from the signature difference instead of
    /// stored scripts.
    #[arg(long)]
    hint: bool,

    /// Print the compiled SQL instead of the evolution scripts.
    #[arg(long)]
    sql: bool,

    /// Apply the evolution to the database.
    #[arg(short = 'x', long)]
    execute: bool,

    /// Do not prompt for confirmation before executing.
    #[arg(long, alias = "noninteractive")]
    noinput: bool,

    /// Record the current models as the evolution baseline and exit.
    #[arg(long)]
    baseline: bool,

    /// 0 = quiet, 1 = normal, 2 = verbose.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    verbosity: u8,

    #[arg(long)]
    database: Option<PathBuf>,

    #[arg(long)]
    scripts: Option<PathBuf>,

    #[arg(long)]
    models: Option<PathBuf>,

    #[arg(long)]
    backend: Option<BackendKind>,

    /// Copy the database here before executing.
    #[arg(long)]
    backup: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).without_time())
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` when the run ended without error but must still exit
/// non-zero.
fn run(cli: &Cli) -> Result<bool> {
    let mut config = EvolveConfig::from_env().context("reading configuration")?;
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }
    if let Some(path) = &cli.scripts {
        config.scripts_dir = path.clone();
    }
    if let Some(path) = &cli.models {
        config.models_path = path.clone();
    }
    if let Some(kind) = cli.backend {
        config.backend = kind;
    }
    if cli.noinput {
        config.noninteractive = true;
    }

    let database = Database::new(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let catalog = SignatureCatalog::from_path(&config.models_path)
        .with_context(|| format!("loading models from {}", config.models_path.display()))?;
    let current = project_signature(&catalog)?;
    let backend = config.backend.backend();
    let scripts = DirectoryScripts::new(&config.scripts_dir);
    let router = SingleDatabase;
    let mut evolver = Evolver::new(&database, &*backend, &scripts).with_router(&config.database_alias, &router);

    if cli.baseline {
        let version_id = evolver.install_baseline(&current)?;
        if cli.verbosity > 0 {
            println!("Evolution baseline recorded (version {version_id}).");
        }
        return Ok(true);
    }

    if cli.execute {
        if let Some(dest) = &cli.backup {
            let path = database.backup_to(expand_tilde(dest))?;
            if cli.verbosity > 0 {
                println!("Database backed up to {}.", path.display());
            }
        }
    }

    let options = EvolveOptions {
        app_labels: cli.app_labels.clone(),
        hint: cli.hint,
        execute: cli.execute,
        interactive: !config.noninteractive,
    };
    let stdin = io::stdin();
    let mut prompt = ReaderPrompt::new(stdin.lock(), io::stdout());
    let report = evolver.run(&current, &options, &mut prompt)?;

    print_report(cli, &report)?;
    Ok(report.outcome != EvolveOutcome::Cancelled)
}

fn print_report(cli: &Cli, report: &EvolveReport) -> Result<()> {
    let show_plan = !cli.execute || cli.verbosity > 1;
    if show_plan && report.outcome != EvolveOutcome::UpToDate {
        print!("{}", report.render_plan(cli.sql)?);
    }

    if !report.is_verified() {
        eprintln!("Warning: the evolution could not be fully verified. These mutations were not simulated:");
        for mutation in &report.unverified {
            eprintln!("    {mutation}");
        }
    }

    if cli.verbosity == 0 {
        return Ok(());
    }
    match &report.outcome {
        EvolveOutcome::UpToDate => println!("No evolution required."),
        EvolveOutcome::Trial => {
            println!("Trial evolution successful.");
            println!("Run 'evolve --execute' to apply evolution.");
        }
        EvolveOutcome::Executed { .. } => println!("Evolution successful."),
        EvolveOutcome::Cancelled => println!("Evolution cancelled."),
    }
    Ok(())
}
