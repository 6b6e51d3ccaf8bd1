// ABOUTME: Phase selection for a migration run
// ABOUTME: Maps operation tokens (RUNALL, EXPORT, PUT, LOAD) onto an ordered phase set

use clap::ValueEnum;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// One stage of the migration, ordered by execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Export,
    Transfer,
    Load,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Export, Phase::Transfer, Phase::Load];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Export => "EXPORT",
            Phase::Transfer => "TRANSFER",
            Phase::Load => "LOAD",
        };
        f.write_str(name)
    }
}

/// Operation tokens accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum Operation {
    /// Export, transfer and load every table
    Runall,
    /// Export tables on the source server
    Export,
    /// Upload export files to object storage
    Put,
    /// Load staged objects into the target database
    Load,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("no operation given")]
    NoOperations,

    #[error("RUNALL must be used by itself")]
    RunAllNotAlone,
}

/// The phases selected for a run
///
/// Iteration always yields EXPORT, TRANSFER, LOAD order regardless of the
/// order the tokens were given in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSet(BTreeSet<Phase>);

impl PhaseSet {
    pub fn all() -> Self {
        Self(Phase::ALL.into_iter().collect())
    }

    /// Resolve command-line operations into phases
    ///
    /// Repeated tokens are accepted and collapse to one phase.
    ///
    /// # Errors
    ///
    /// - [`UsageError::NoOperations`] if `operations` is empty
    /// - [`UsageError::RunAllNotAlone`] if RUNALL appears with any other token
    ///
    /// # Examples
    ///
    /// ```
    /// # use stage_migrator::migration::{Operation, Phase, PhaseSet};
    /// let phases = PhaseSet::from_operations(&[Operation::Load, Operation::Export]).unwrap();
    /// assert_eq!(phases.iter().collect::<Vec<_>>(), vec![Phase::Export, Phase::Load]);
    /// ```
    pub fn from_operations(operations: &[Operation]) -> Result<Self, UsageError> {
        if operations.is_empty() {
            return Err(UsageError::NoOperations);
        }

        if operations.contains(&Operation::Runall) {
            if operations.iter().any(|op| *op != Operation::Runall) {
                return Err(UsageError::RunAllNotAlone);
            }
            return Ok(Self::all());
        }

        let phases = operations
            .iter()
            .filter_map(|op| match op {
                Operation::Export => Some(Phase::Export),
                Operation::Put => Some(Phase::Transfer),
                Operation::Load => Some(Phase::Load),
                Operation::Runall => None,
            })
            .collect();

        Ok(Self(phases))
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.iter().copied()
    }
}
