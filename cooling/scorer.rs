// ========================================================================================
//                                The scorer capability
// ========================================================================================

use crate::dataset::{AttributeDataset, DataError};
use crate::main_effects::ImportanceParseError;
use crate::relief::ReliefError;
use crate::scores::ScoreSet;
use std::path::PathBuf;
use thiserror::Error;

/// Anything that can assign one score to every active attribute of a data set.
///
/// The concrete learner (and its classification or regression flavour) is fixed
/// when the scorer is built; `score` is then called once per cooling iteration
/// with the data set restricted to the attributes still in play. Implementations
/// must return exactly one entry per active attribute and nothing else.
pub trait AttributeScorer {
    /// A short human-readable label used in logs and error messages.
    fn name(&self) -> &str;

    fn score(&mut self, dataset: &dyn AttributeDataset) -> Result<ScoreSet, ScorerError>;
}

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("Data set access failed: {0}")]
    Data(#[from] DataError),
    #[error("I/O error while exchanging data with the learner: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse the learner's importance file: {0}")]
    Parse(#[from] ImportanceParseError),
    #[error("Nearest-neighbour relevance estimation failed: {0}")]
    Relief(#[from] ReliefError),
    #[error("Could not start learner '{}': {source}", .program.display())]
    LearnerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Learner '{}' exited with {status}: {stderr}", .program.display())]
    LearnerFailed {
        program: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("The data set has no active genotype or numeric attributes, so no tree type applies.")]
    NoTreeType,
    #[error("{0}")]
    Other(String),
}
