//! Engine budgets and switches

use super::error::{ConfigError, ConfigResult};
use super::preset::Preset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Analysis engine configuration
///
/// Every unbounded dimension of the analysis (paths, recursion, call-boundary
/// abduction, disjunct width, loop unrolling, instructions, wall-clock) has a
/// budget here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max explored paths per procedure (1..=100000)
    pub path_budget: usize,

    /// Max fixpoint rounds per recursive SCC (1..=64)
    pub scc_rounds: usize,

    /// Max call-boundary abductions per path (0..=64)
    pub abduction_depth: usize,

    /// Disjuncts kept at a CFG join node before states are joined (1..=1024)
    pub max_disjuncts: usize,

    /// Max visits of one CFG node on one path (1..=64)
    pub loop_unroll: usize,

    /// Max interpreted instructions per procedure (1..=100000000)
    pub step_budget: usize,

    /// Wall-clock budget per procedure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_timeout_ms: Option<u64>,

    /// Wall-clock budget for the whole run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,

    /// Worker pool size (0 = number of CPUs)
    #[serde(default)]
    pub worker_threads: usize,

    /// Run the retain-cycle detector over Ok postconditions
    #[serde(default = "default_true")]
    pub detect_retain_cycles: bool,
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            Preset::Fast => Self {
                path_budget: 64,
                scc_rounds: 1,
                abduction_depth: 2,
                max_disjuncts: 8,
                loop_unroll: 1,
                step_budget: 20_000,
                procedure_timeout_ms: Some(1_000),
                run_timeout_ms: None,
                worker_threads: 0,
                detect_retain_cycles: true,
            },
            Preset::Balanced | Preset::Custom => Self {
                path_budget: 256,
                scc_rounds: 3,
                abduction_depth: 4,
                max_disjuncts: 32,
                loop_unroll: 2,
                step_budget: 200_000,
                procedure_timeout_ms: Some(10_000),
                run_timeout_ms: None,
                worker_threads: 0,
                detect_retain_cycles: true,
            },
            Preset::Thorough => Self {
                path_budget: 4096,
                scc_rounds: 8,
                abduction_depth: 8,
                max_disjuncts: 256,
                loop_unroll: 3,
                step_budget: 5_000_000,
                procedure_timeout_ms: Some(120_000),
                run_timeout_ms: None,
                worker_threads: 0,
                detect_retain_cycles: true,
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.path_budget == 0 || self.path_budget > 100_000 {
            return Err(ConfigError::range_with_hint(
                "path_budget",
                self.path_budget,
                1,
                100_000,
                "At least one path must be explored per procedure",
            ));
        }

        if self.scc_rounds == 0 || self.scc_rounds > 64 {
            return Err(ConfigError::range_with_hint(
                "scc_rounds",
                self.scc_rounds,
                1,
                64,
                "Recursive SCCs need at least one round",
            ));
        }

        if self.abduction_depth > 64 {
            return Err(ConfigError::range_with_hint(
                "abduction_depth",
                self.abduction_depth,
                0,
                64,
                "Deep call-boundary abduction rarely terminates usefully",
            ));
        }

        if self.max_disjuncts == 0 || self.max_disjuncts > 1024 {
            return Err(ConfigError::range_with_hint(
                "max_disjuncts",
                self.max_disjuncts,
                1,
                1024,
                "Join width cap must be 1-1024",
            ));
        }

        if self.loop_unroll == 0 || self.loop_unroll > 64 {
            return Err(ConfigError::range_with_hint(
                "loop_unroll",
                self.loop_unroll,
                1,
                64,
                "Each node must be visitable at least once",
            ));
        }

        if self.step_budget == 0 || self.step_budget > 100_000_000 {
            return Err(ConfigError::range_with_hint(
                "step_budget",
                self.step_budget,
                1,
                100_000_000,
                "Step budget must be positive",
            ));
        }

        if let (Some(proc_ms), Some(run_ms)) = (self.procedure_timeout_ms, self.run_timeout_ms) {
            if proc_ms > run_ms {
                return Err(ConfigError::Validation(format!(
                    "procedure_timeout_ms ({}) exceeds run_timeout_ms ({})",
                    proc_ms, run_ms
                )));
            }
        }

        Ok(())
    }

    /// Worker pool size with `0` resolved to the CPU count
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }

    pub fn procedure_timeout(&self) -> Option<Duration> {
        self.procedure_timeout_ms.map(Duration::from_millis)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Builders
    // ═══════════════════════════════════════════════════════════════════════

    pub fn path_budget(mut self, v: usize) -> Self {
        self.path_budget = v;
        self
    }

    pub fn scc_rounds(mut self, v: usize) -> Self {
        self.scc_rounds = v;
        self
    }

    pub fn abduction_depth(mut self, v: usize) -> Self {
        self.abduction_depth = v;
        self
    }

    pub fn max_disjuncts(mut self, v: usize) -> Self {
        self.max_disjuncts = v;
        self
    }

    pub fn loop_unroll(mut self, v: usize) -> Self {
        self.loop_unroll = v;
        self
    }

    pub fn step_budget(mut self, v: usize) -> Self {
        self.step_budget = v;
        self
    }

    pub fn procedure_timeout_ms(mut self, v: Option<u64>) -> Self {
        self.procedure_timeout_ms = v;
        self
    }

    pub fn run_timeout_ms(mut self, v: Option<u64>) -> Self {
        self.run_timeout_ms = v;
        self
    }

    pub fn worker_threads(mut self, v: usize) -> Self {
        self.worker_threads = v;
        self
    }

    pub fn detect_retain_cycles(mut self, v: bool) -> Self {
        self.detect_retain_cycles = v;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_preset(Preset::Balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for preset in [Preset::Fast, Preset::Balanced, Preset::Thorough, Preset::Custom] {
            assert!(EngineConfig::from_preset(preset).validate().is_ok());
        }
    }

    #[test]
    fn test_presets_are_ordered() {
        let fast = EngineConfig::from_preset(Preset::Fast);
        let thorough = EngineConfig::from_preset(Preset::Thorough);
        assert!(fast.path_budget < thorough.path_budget);
        assert!(fast.scc_rounds < thorough.scc_rounds);
    }

    #[test]
    fn test_range_errors() {
        let err = EngineConfig::default().scc_rounds(0).validate().unwrap_err();
        assert!(err.to_string().contains("scc_rounds"));

        let err = EngineConfig::default().path_budget(200_000).validate().unwrap_err();
        assert!(err.to_string().contains("path_budget"));

        assert!(EngineConfig::default().abduction_depth(0).validate().is_ok());
    }

    #[test]
    fn test_timeout_conflict() {
        let cfg = EngineConfig::default()
            .procedure_timeout_ms(Some(5_000))
            .run_timeout_ms(Some(1_000));
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_worker_threads_default() {
        assert!(EngineConfig::default().effective_worker_threads() >= 1);
        assert_eq!(EngineConfig::default().worker_threads(3).effective_worker_threads(), 3);
    }
}
