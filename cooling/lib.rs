#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod controller;
pub mod dataset;
pub mod diagnostics;
pub mod evaporate;
pub mod free_energy;
pub mod interaction;
pub mod main_effects;
pub mod progress;
pub mod relief;
pub mod scorer;
pub mod scores;

pub use config::{AlgorithmMode, ConfigError, EcConfig, RemovalPolicy};
pub use controller::{EcError, EcOutcome, EvaporativeCooling};
pub use dataset::{AttributeDataset, AttributeKind, AttributeMatrix, DataError};
pub use scorer::{AttributeScorer, ScorerError};
pub use scores::{Score, ScoreSet};
