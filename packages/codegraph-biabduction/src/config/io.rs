//! Configuration I/O (YAML loading)

use super::engine_config::EngineConfig;
use super::error::{ConfigError, ConfigResult};
use super::preset::Preset;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SUPPORTED_VERSIONS: &[u32] = &[1];

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigExportV1 {
    /// Schema version (always 1 for v1)
    pub version: u32,

    /// Base preset
    pub preset: String,

    /// Fine-grained overrides on top of the preset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<EngineConfigPatch>,
}

/// Patch type for EngineConfig (all fields optional)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_budget: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scc_rounds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abduction_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_disjuncts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_unroll: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_budget: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect_retain_cycles: Option<bool>,
}

impl EngineConfig {
    /// Apply a patch on top of this configuration
    pub fn patch(mut self, patch: EngineConfigPatch) -> Self {
        if let Some(v) = patch.path_budget {
            self.path_budget = v;
        }
        if let Some(v) = patch.scc_rounds {
            self.scc_rounds = v;
        }
        if let Some(v) = patch.abduction_depth {
            self.abduction_depth = v;
        }
        if let Some(v) = patch.max_disjuncts {
            self.max_disjuncts = v;
        }
        if let Some(v) = patch.loop_unroll {
            self.loop_unroll = v;
        }
        if let Some(v) = patch.step_budget {
            self.step_budget = v;
        }
        if patch.procedure_timeout_ms.is_some() {
            self.procedure_timeout_ms = patch.procedure_timeout_ms;
        }
        if patch.run_timeout_ms.is_some() {
            self.run_timeout_ms = patch.run_timeout_ms;
        }
        if let Some(v) = patch.worker_threads {
            self.worker_threads = v;
        }
        if let Some(v) = patch.detect_retain_cycles {
            self.detect_retain_cycles = v;
        }
        self
    }

    /// Parse and validate a v1 YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        match raw.get("version") {
            None => return Err(ConfigError::MissingVersion),
            Some(v) => {
                let found = v.as_u64().unwrap_or(0) as u32;
                if !SUPPORTED_VERSIONS.contains(&found) {
                    return Err(ConfigError::UnsupportedVersion {
                        found,
                        supported: SUPPORTED_VERSIONS.to_vec(),
                    });
                }
            }
        }

        let export: ConfigExportV1 = serde_yaml::from_value(raw)?;
        let preset: Preset = export.preset.parse()?;
        let config = Self::from_preset(preset).patch(export.overrides.unwrap_or_default());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Export as a v1 YAML document (preset `custom` with every field overridden)
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let export = ConfigExportV1 {
            version: 1,
            preset: Preset::Custom.as_str().to_string(),
            overrides: Some(EngineConfigPatch {
                path_budget: Some(self.path_budget),
                scc_rounds: Some(self.scc_rounds),
                abduction_depth: Some(self.abduction_depth),
                max_disjuncts: Some(self.max_disjuncts),
                loop_unroll: Some(self.loop_unroll),
                step_budget: Some(self.step_budget),
                procedure_timeout_ms: self.procedure_timeout_ms,
                run_timeout_ms: self.run_timeout_ms,
                worker_threads: Some(self.worker_threads),
                detect_retain_cycles: Some(self.detect_retain_cycles),
            }),
        };
        Ok(serde_yaml::to_string(&export)?)
    }
}
