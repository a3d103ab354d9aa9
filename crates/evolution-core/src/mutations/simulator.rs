//! Replays mutation lists against a private copy of a signature.

use tracing::debug;

use crate::errors::{EvolutionError, SimulationFailure};
use crate::models::ProjectSignature;

use super::{Mutation, MutationContext};

/// Result of simulating one mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// The mutation cannot describe its effect; the signature is unchanged.
    Unverified,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimulationOutcome {
    Verified,
    /// Rendered forms of the mutations that could not be simulated.
    Unverified(Vec<String>),
    Failed(SimulationFailure),
}

/// Simulate a single mutation in place, attaching the mutation's rendered
/// form to any failure.
pub fn simulate_step(
    mutation: &Mutation,
    ctx: &MutationContext<'_>,
    signature: &mut ProjectSignature,
) -> Result<StepOutcome, SimulationFailure> {
    debug!(app = ctx.app_label, mutation = %mutation, "simulating");
    match mutation.simulate(ctx, signature) {
        Ok(()) => Ok(StepOutcome::Applied),
        Err(EvolutionError::CannotSimulate(_)) => Ok(StepOutcome::Unverified),
        Err(EvolutionError::Simulation(failure)) => Err(failure.with_mutation(mutation.to_string())),
        Err(other) => Err(ctx.failure(other.to_string()).with_mutation(mutation.to_string())),
    }
}

/// Apply `mutations` in order to a copy of `signature`.  Stops at the first
/// failure; unsimulatable mutations are recorded and skipped.
pub fn apply(
    signature: &ProjectSignature,
    ctx: &MutationContext<'_>,
    mutations: &[Mutation],
) -> (ProjectSignature, SimulationOutcome) {
    let mut working = signature.clone();
    let mut unverified = Vec::new();
    for mutation in mutations {
        match simulate_step(mutation, ctx, &mut working) {
            Ok(StepOutcome::Applied) => {}
            Ok(StepOutcome::Unverified) => unverified.push(mutation.to_string()),
            Err(failure) => return (working, SimulationOutcome::Failed(failure)),
        }
    }
    let outcome = if unverified.is_empty() {
        SimulationOutcome::Verified
    } else {
        SimulationOutcome::Unverified(unverified)
    };
    (working, outcome)
}
