// ========================================================================================
//                              Run configuration and validation
// ========================================================================================
//
// Every option the cooling loop recognises is a named field here. The struct is
// validated once, against the data set it will run on, before any scoring starts;
// after that it is never mutated. It can be written to and read from TOML so a run
// can be reproduced exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// The temperature used in `F = E + T * S`. The published annealing schedule is
/// not implemented; every iteration runs at this value.
pub const FIXED_TEMPERATURE: f64 = 1.0;

const DEFAULT_NUM_TREES: u64 = 1000;
const DEFAULT_NEIGHBORS: usize = 10;
const DEFAULT_FOREST_EXECUTABLE: &str = "rjungle";
const DEFAULT_OUTPUT_PREFIX: &str = "evapcool";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The data set has no attributes to select from.")]
    EmptyDataset,
    #[error("The number of target attributes must be at least 1 (got {0}).")]
    InvalidTarget(usize),
    #[error(
        "The number of target attributes ({target}) must be less than or equal to the number of attributes in the data set ({available})."
    )]
    TargetExceedsAttributes { target: usize, available: usize },
    #[error("Algorithm mode must be one of: combined (all), main-effects-only (rj) or interaction-only (rf); got '{0}'.")]
    UnknownAlgorithm(String),
    #[error("The {phase} removal percentage must lie between 0 and 100 (got {percent}).")]
    InvalidPercent { phase: &'static str, percent: u32 },
    #[error(
        "Only a fixed temperature of 1.0 is supported; the annealing schedule is not implemented (got {0})."
    )]
    UnsupportedTemperature(f64),
    #[error("The nearest-neighbour scorer needs at least one neighbour.")]
    ZeroNeighbors,
    #[error("Algorithm mode '{mode}' requires a {phase} scorer, but none was supplied.")]
    MissingScorer { mode: AlgorithmMode, phase: &'static str },
}

/// Which scoring phases take part in the free energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AlgorithmMode {
    /// Random Jungle main effects plus ReliefF interactions.
    #[default]
    Combined,
    MainEffectsOnly,
    InteractionOnly,
}

impl AlgorithmMode {
    pub fn uses_main_effects(self) -> bool {
        matches!(self, Self::Combined | Self::MainEffectsOnly)
    }

    pub fn uses_interaction(self) -> bool {
        matches!(self, Self::Combined | Self::InteractionOnly)
    }

    /// Suffix appended to the output prefix so partial runs are never mistaken
    /// for full ones.
    pub fn output_suffix(self) -> &'static str {
        match self {
            Self::Combined => ".ec",
            Self::MainEffectsOnly => ".ec.rj",
            Self::InteractionOnly => ".ec.rf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::MainEffectsOnly => "main-effects-only",
            Self::InteractionOnly => "interaction-only",
        }
    }
}

impl fmt::Display for AlgorithmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "combined" | "all" => Ok(Self::Combined),
            "main-effects-only" | "rj" => Ok(Self::MainEffectsOnly),
            "interaction-only" | "rf" => Ok(Self::InteractionOnly),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for AlgorithmMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmMode> for String {
    fn from(mode: AlgorithmMode) -> Self {
        mode.as_str().to_string()
    }
}

/// How many attributes to drop in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// A fixed number per iteration.
    Count(usize),
    /// A percentage of the attributes still in play at the start of the iteration.
    Percent(u32),
}

impl RemovalPolicy {
    /// The raw number to remove from `working` attributes, before any clamping.
    /// Percentages are truncated toward zero.
    pub fn resolve(self, working: usize) -> usize {
        match self {
            Self::Count(n) => n,
            Self::Percent(p) => ((p as f64 / 100.0) * working as f64) as usize,
        }
    }

    fn validate(self, phase: &'static str) -> Result<(), ConfigError> {
        match self {
            Self::Percent(p) if p > 100 => Err(ConfigError::InvalidPercent { phase, percent: p }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n} per iteration"),
            Self::Percent(p) => write!(f, "{p}% of the working attributes per iteration"),
        }
    }
}

/// Settings for the external Random Jungle learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MainEffectsConfig {
    /// The `rjungle` executable (or a compatible wrapper).
    pub executable: PathBuf,
    /// Arguments placed before the learner's own flags, e.g. a script path when
    /// `executable` is an interpreter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    pub num_trees: u64,
    /// Requested worker threads; 0 means all available processors.
    pub threads: usize,
}

impl Default for MainEffectsConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_FOREST_EXECUTABLE),
            extra_args: Vec::new(),
            num_trees: DEFAULT_NUM_TREES,
            threads: 0,
        }
    }
}

/// Settings for the in-process ReliefF family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub k_nearest_neighbors: usize,
    /// Requested worker threads; 0 means all available processors.
    pub threads: usize,
    /// When set (and non-zero), ReliefF runs iteratively and drops this many
    /// attributes from its own working list between internal passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterative_removal: Option<RemovalPolicy>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            k_nearest_neighbors: DEFAULT_NEIGHBORS,
            threads: 0,
            iterative_removal: None,
        }
    }
}

impl InteractionConfig {
    /// True when the iterative variant is configured with a non-zero removal.
    pub fn is_iterative(&self) -> bool {
        match self.iterative_removal {
            Some(RemovalPolicy::Count(n)) => n > 0,
            Some(RemovalPolicy::Percent(p)) => p > 0,
            None => false,
        }
    }
}

/// The complete, typed configuration of one Evaporative Cooling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcConfig {
    /// Attributes to keep when cooling stops.
    pub target_attributes: usize,
    #[serde(default)]
    pub algorithm: AlgorithmMode,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Prefix for learner scratch files and result files. The Random Jungle
    /// scratch files `<prefix>.rj.dat` and `<prefix>.importance` are rewritten
    /// every iteration and left behind afterwards; they hold the last
    /// iteration's learner input and output, not the cooling result.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: PathBuf,
    /// Attributes evaporated per iteration of the outer loop.
    #[serde(default = "default_removal")]
    pub removal: RemovalPolicy,
    #[serde(default)]
    pub main_effects: MainEffectsConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
}

fn default_removal() -> RemovalPolicy {
    RemovalPolicy::Count(1)
}

fn default_temperature() -> f64 {
    FIXED_TEMPERATURE
}

fn default_output_prefix() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PREFIX)
}

impl EcConfig {
    /// A configuration with every option at its default and the given target.
    pub fn new(target_attributes: usize) -> Self {
        Self {
            target_attributes,
            algorithm: AlgorithmMode::default(),
            temperature: FIXED_TEMPERATURE,
            output_prefix: default_output_prefix(),
            removal: default_removal(),
            main_effects: MainEffectsConfig::default(),
            interaction: InteractionConfig::default(),
        }
    }

    /// Checks every option against the data set the run will operate on.
    pub fn validate(&self, attribute_count: usize) -> Result<(), ConfigError> {
        if attribute_count == 0 {
            return Err(ConfigError::EmptyDataset);
        }
        if self.target_attributes < 1 {
            return Err(ConfigError::InvalidTarget(self.target_attributes));
        }
        if self.target_attributes > attribute_count {
            return Err(ConfigError::TargetExceedsAttributes {
                target: self.target_attributes,
                available: attribute_count,
            });
        }
        self.removal.validate("evaporative cooling")?;
        if let Some(policy) = self.interaction.iterative_removal {
            policy.validate("iterative ReliefF")?;
        }
        if self.temperature != FIXED_TEMPERATURE {
            return Err(ConfigError::UnsupportedTemperature(self.temperature));
        }
        if self.algorithm.uses_interaction() && self.interaction.k_nearest_neighbors == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }
}

/// Maps a thread hint onto the machine: 0, or more than the available
/// processors, means "use every processor".
pub fn resolve_thread_count(requested: usize) -> usize {
    let available = num_cpus::get().max(1);
    if requested < 1 || requested > available {
        available
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn algorithm_mode_accepts_canonical_and_legacy_names() {
        assert_eq!("combined".parse::<AlgorithmMode>().unwrap(), AlgorithmMode::Combined);
        assert_eq!("ALL".parse::<AlgorithmMode>().unwrap(), AlgorithmMode::Combined);
        assert_eq!("rj".parse::<AlgorithmMode>().unwrap(), AlgorithmMode::MainEffectsOnly);
        assert_eq!(
            "interaction-only".parse::<AlgorithmMode>().unwrap(),
            AlgorithmMode::InteractionOnly
        );
        match "relief".parse::<AlgorithmMode>().unwrap_err() {
            ConfigError::UnknownAlgorithm(s) => assert_eq!(s, "relief"),
            other => panic!("Expected UnknownAlgorithm, got {:?}", other),
        }
    }

    #[test]
    fn percent_removal_truncates_against_live_count() {
        assert_eq!(RemovalPolicy::Percent(10).resolve(100), 10);
        assert_eq!(RemovalPolicy::Percent(10).resolve(95), 9);
        assert_eq!(RemovalPolicy::Percent(10).resolve(9), 0);
        assert_eq!(RemovalPolicy::Count(4).resolve(2), 4);
    }

    #[test]
    fn validation_rejects_bad_targets_and_options() {
        assert!(matches!(
            EcConfig::new(0).validate(10),
            Err(ConfigError::InvalidTarget(0))
        ));
        assert!(matches!(
            EcConfig::new(11).validate(10),
            Err(ConfigError::TargetExceedsAttributes { target: 11, available: 10 })
        ));
        assert!(matches!(EcConfig::new(1).validate(0), Err(ConfigError::EmptyDataset)));
        assert!(EcConfig::new(10).validate(10).is_ok());

        let mut config = EcConfig::new(3);
        config.removal = RemovalPolicy::Percent(150);
        assert!(matches!(
            config.validate(10),
            Err(ConfigError::InvalidPercent { percent: 150, .. })
        ));

        let mut config = EcConfig::new(3);
        config.temperature = 0.5;
        assert!(matches!(
            config.validate(10),
            Err(ConfigError::UnsupportedTemperature(_))
        ));

        let mut config = EcConfig::new(3);
        config.interaction.k_nearest_neighbors = 0;
        assert!(matches!(config.validate(10), Err(ConfigError::ZeroNeighbors)));
        config.algorithm = AlgorithmMode::MainEffectsOnly;
        assert!(config.validate(10).is_ok());
    }

    #[test]
    fn iterative_mode_requires_nonzero_removal() {
        let mut interaction = InteractionConfig::default();
        assert!(!interaction.is_iterative());
        interaction.iterative_removal = Some(RemovalPolicy::Count(0));
        assert!(!interaction.is_iterative());
        interaction.iterative_removal = Some(RemovalPolicy::Percent(5));
        assert!(interaction.is_iterative());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut original = EcConfig::new(25);
        original.algorithm = AlgorithmMode::InteractionOnly;
        original.removal = RemovalPolicy::Percent(20);
        original.interaction.iterative_removal = Some(RemovalPolicy::Count(3));
        original.main_effects.num_trees = 500;

        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        original.save(temp_file.path()).expect("Failed to save config");
        let loaded = EcConfig::load(temp_file.path()).expect("Failed to load config");

        assert_eq!(loaded, original);
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: EcConfig = toml::from_str("target_attributes = 5\nalgorithm = \"rf\"\n").unwrap();
        assert_eq!(config.target_attributes, 5);
        assert_eq!(config.algorithm, AlgorithmMode::InteractionOnly);
        assert_eq!(config.removal, RemovalPolicy::Count(1));
        assert_eq!(config.temperature, FIXED_TEMPERATURE);
        assert_eq!(config.interaction.k_nearest_neighbors, 10);
        assert_eq!(config.main_effects.executable, PathBuf::from("rjungle"));

        let bad = toml::from_str::<EcConfig>("target_attributes = 5\nalgorithm = \"forest\"\n");
        assert!(bad.is_err());
    }

    #[test]
    fn thread_hints_are_clamped_to_available_processors() {
        let available = num_cpus::get().max(1);
        assert_eq!(resolve_thread_count(0), available);
        assert_eq!(resolve_thread_count(available + 7), available);
        assert_eq!(resolve_thread_count(1), 1);
    }
}
