//! Evolution core library: schema signatures, structural diffing, mutation
//! simulation and transactional schema evolution.
//!
//! The pipeline compares the signature recorded at the last evolution with
//! the signature of the current models, replays a list of mutations (either
//! hinted from the diff or loaded from stored scripts) against a copy of the
//! recorded one, verifies the result matches, and only then executes the
//! compiled statements in a single transaction.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod diff;
pub mod errors;
pub mod evolve;
pub mod models;
pub mod mutations;
pub mod store;

pub use backend::{BackendKind, SchemaBackend};
pub use catalog::{project_signature, ModelCatalog, SignatureCatalog};
pub use config::EvolveConfig;
pub use diff::{diff, StructuralDiff};
pub use errors::{EvolutionError, EvolutionResult, SimulationFailure};
pub use evolve::{EvolveOptions, EvolveOutcome, EvolveReport, Evolver};
pub use models::{FieldKind, FieldSignature, InitialValue, ModelSignature, ProjectSignature};
pub use mutations::{Mutation, MutationContext};
pub use store::Database;

// ---------------------------------------------------------------------------
// Shared test fixtures
// ---------------------------------------------------------------------------
