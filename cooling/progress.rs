use crate::diagnostics::IterationStats;
use std::fmt;

/// The phases of one cooling iteration, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoolingPhase {
    MainEffects,
    Interaction,
    Fusion,
    Elimination,
}

impl CoolingPhase {
    pub fn describe(self) -> &'static str {
        match self {
            Self::MainEffects => "main effects",
            Self::Interaction => "interaction",
            Self::Fusion => "free-energy fusion",
            Self::Elimination => "elimination",
        }
    }
}

impl fmt::Display for CoolingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while cooling.
pub trait CoolingProgressObserver {
    fn on_run_start(&mut self, working_attributes: usize, target_attributes: usize) {
        let _ = (working_attributes, target_attributes);
    }
    fn on_phase_start(&mut self, iteration: usize, phase: CoolingPhase) {
        let _ = (iteration, phase);
    }
    fn on_iteration_finish(&mut self, stats: &IterationStats, remaining_attributes: usize) {
        let _ = (stats, remaining_attributes);
    }
    fn on_run_finish(&mut self, remaining_attributes: usize) {
        let _ = remaining_attributes;
    }
}

#[derive(Default)]
pub struct NoopCoolingProgress;

impl CoolingProgressObserver for NoopCoolingProgress {}
