//! The single human confirmation point before physical execution.

use std::io::{BufRead, Write};

use crate::errors::EvolutionResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Proceed,
    Cancel,
}

pub trait Confirm {
    /// Ask whether to execute against `database`.
    fn confirm(&mut self, database: &str) -> EvolutionResult<Confirmation>;
}

/// Consent without asking.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysProceed;

impl Confirm for AlwaysProceed {
    fn confirm(&mut self, _database: &str) -> EvolutionResult<Confirmation> {
        Ok(Confirmation::Proceed)
    }
}

/// Line-based prompt.  Only an exact `yes` proceeds.
pub struct ReaderPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ReaderPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for ReaderPrompt<R, W> {
    fn confirm(&mut self, database: &str) -> EvolutionResult<Confirmation> {
        write!(
            self.output,
            "\nYou have requested a database evolution. This will alter tables and data\n\
             currently in the {database:?} database, and may result in IRREVERSIBLE DATA LOSS.\n\
             Evolutions should be *thoroughly* reviewed prior to execution.\n\n\
             Are you sure you want to execute the evolutions?\n\n\
             Type 'yes' to continue, or 'no' to cancel: "
        )?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(if answer.trim() == "yes" {
            Confirmation::Proceed
        } else {
            Confirmation::Cancel
        })
    }
}
