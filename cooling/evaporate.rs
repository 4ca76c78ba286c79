// ========================================================================================
//                                 Attribute evaporation
// ========================================================================================

use crate::dataset::{AttributeDataset, DataError};
use crate::scores::{Score, ScoreSet};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EliminationError {
    #[error("Cannot remove {requested} attributes from a free-energy set of {available}.")]
    MoreThanScored { requested: usize, available: usize },
    #[error(
        "Removing {requested} attributes would leave none of the {active} active attributes in the data set."
    )]
    WouldEmptyDataset { requested: usize, active: usize },
    #[error("Failed to remove an evaporated attribute from the data set: {0}")]
    Data(#[from] DataError),
}

/// Removes the `n` attributes with the lowest free energy from `dataset`.
///
/// Ties keep the order they have in `free_energy`. All bounds are checked before the
/// data set is touched. Returns the evaporated scores, lowest first.
pub fn eliminate(
    free_energy: &ScoreSet,
    n: usize,
    dataset: &mut dyn AttributeDataset,
) -> Result<Vec<Score>, EliminationError> {
    if n > free_energy.len() {
        return Err(EliminationError::MoreThanScored {
            requested: n,
            available: free_energy.len(),
        });
    }
    let active = dataset.attribute_count();
    if n >= active {
        return Err(EliminationError::WouldEmptyDataset { requested: n, active });
    }

    let mut ordered = free_energy.clone();
    ordered.sort_ascending();
    let mut evaporated = ordered.into_vec();
    evaporated.truncate(n);

    for score in &evaporated {
        debug!("Evaporating {} (free energy {:.8})", score.attribute, score.value);
        dataset.remove_attribute(&score.attribute)?;
    }
    Ok(evaporated)
}
