#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

// ========================================================================================
//
//                        The command-line driver: evapcool
//
// ========================================================================================
//
// Loads a tab-separated data set, assembles an `EcConfig` from an optional TOML file
// overlaid with command-line flags, runs Evaporative Cooling and writes the surviving
// attributes to `<prefix>.ec`, `<prefix>.ec.rj` or `<prefix>.ec.rf` depending on
// the algorithm mode.

use clap::Parser;
use evapcool::config::{AlgorithmMode, EcConfig, RemovalPolicy};
use evapcool::controller::EvaporativeCooling;
use evapcool::dataset::{AttributeDataset, AttributeMatrix};
use evapcool::diagnostics::IterationStats;
use evapcool::progress::{CoolingPhase, CoolingProgressObserver};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                           Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "evapcool",
    version,
    about = "Evaporative Cooling feature selection: iteratively removes the attributes with the lowest combined main-effect and interaction relevance."
)]
struct Args {
    /// Tab-separated data file with a header row and a `phenotype` column.
    data: PathBuf,

    /// TOML configuration file; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of attributes to keep.
    #[arg(long, short = 't')]
    target: Option<usize>,

    /// combined, main-effects-only or interaction-only (aliases: all, rj, rf).
    #[arg(long, short = 'a')]
    algorithm: Option<AlgorithmMode>,

    /// Attributes to evaporate per iteration.
    #[arg(long, conflicts_with = "ec_iter_remove_percent")]
    ec_iter_remove_n: Option<usize>,

    /// Percentage of the working attributes to evaporate per iteration.
    #[arg(long)]
    ec_iter_remove_percent: Option<u32>,

    /// Attributes iterative ReliefF retires between its internal passes.
    #[arg(long, conflicts_with = "iter_remove_percent")]
    iter_remove_n: Option<usize>,

    /// Percentage of its working attributes iterative ReliefF retires per pass.
    #[arg(long)]
    iter_remove_percent: Option<u32>,

    /// Nearest neighbours used by ReliefF.
    #[arg(long, short = 'k')]
    k_nearest_neighbors: Option<usize>,

    /// Random Jungle executable.
    #[arg(long)]
    rj_executable: Option<PathBuf>,

    /// Trees grown by Random Jungle.
    #[arg(long)]
    rj_num_trees: Option<u64>,

    /// Threads for Random Jungle; 0 uses every processor.
    #[arg(long)]
    rj_num_threads: Option<usize>,

    /// Threads for ReliefF; 0 uses every processor.
    #[arg(long)]
    rf_num_threads: Option<usize>,

    /// Prefix for learner scratch files and the result file.
    #[arg(long, short = 'o')]
    out_files_prefix: Option<PathBuf>,

    /// Write the effective configuration to this TOML file before running.
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(PathBuf, EcConfig, Option<PathBuf>), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => EcConfig::load(path)?,
            None => EcConfig::new(self.target.ok_or(
                "--target is required when no --config file is given",
            )?),
        };
        if let Some(target) = self.target {
            config.target_attributes = target;
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(n) = self.ec_iter_remove_n {
            config.removal = RemovalPolicy::Count(n);
        }
        if let Some(p) = self.ec_iter_remove_percent {
            config.removal = RemovalPolicy::Percent(p);
        }
        if let Some(n) = self.iter_remove_n {
            config.interaction.iterative_removal = Some(RemovalPolicy::Count(n));
        }
        if let Some(p) = self.iter_remove_percent {
            config.interaction.iterative_removal = Some(RemovalPolicy::Percent(p));
        }
        if let Some(k) = self.k_nearest_neighbors {
            config.interaction.k_nearest_neighbors = k;
        }
        if let Some(threads) = self.rf_num_threads {
            config.interaction.threads = threads;
        }
        if let Some(executable) = self.rj_executable {
            config.main_effects.executable = executable;
        }
        if let Some(trees) = self.rj_num_trees {
            config.main_effects.num_trees = trees;
        }
        if let Some(threads) = self.rj_num_threads {
            config.main_effects.threads = threads;
        }
        if let Some(prefix) = self.out_files_prefix {
            config.output_prefix = prefix;
        }
        Ok((self.data, config, self.save_config))
    }
}

// ========================================================================================
//                                  Terminal progress
// ========================================================================================

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} evaporated ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

/// Advances a bar by the number of attributes evaporated.
#[derive(Default)]
struct TerminalProgress {
    bar: Option<ProgressBar>,
    start_working: usize,
}

impl CoolingProgressObserver for TerminalProgress {
    fn on_run_start(&mut self, working_attributes: usize, target_attributes: usize) {
        self.start_working = working_attributes;
        let to_remove = working_attributes.saturating_sub(target_attributes) as u64;
        self.bar = Some(create_progress_bar(to_remove, "cooling"));
    }

    fn on_phase_start(&mut self, iteration: usize, phase: CoolingPhase) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("iteration {iteration}: {phase}"));
        }
    }

    fn on_iteration_finish(&mut self, stats: &IterationStats, remaining_attributes: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(self.start_working.saturating_sub(remaining_attributes) as u64);
            bar.set_message(format!("iteration {} done", stats.iteration));
        }
    }

    fn on_run_finish(&mut self, remaining_attributes: usize) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{remaining_attributes} attributes remain"));
        }
    }
}

// ========================================================================================
//                                     Entry point
// ========================================================================================

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let overall_start = Instant::now();
    let (data_path, config, save_config) = args.into_config()?;

    info!("Loading data set from {}", data_path.display());
    let mut dataset = AttributeMatrix::load_tsv(&data_path)?;
    info!(
        "Loaded {} instances with {} attributes ({} phenotype)",
        dataset.num_instances(),
        dataset.attribute_count(),
        if dataset.has_continuous_phenotype() {
            "continuous"
        } else {
            "case/control"
        }
    );

    if let Some(path) = &save_config {
        config.save(path)?;
        info!("Effective configuration written to {}", path.display());
    }

    let prefix = config.output_prefix.clone();
    let outcome = EvaporativeCooling::new(&mut dataset, config)?
        .with_progress(TerminalProgress::default())
        .run()?;

    let path = outcome.write_results(&prefix)?;
    info!(
        "Wrote {} attribute scores to {} in {:.2?}",
        outcome.ec_scores().len(),
        path.display(),
        overall_start.elapsed()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
