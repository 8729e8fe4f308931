//! Pipeline configuration
//!
//! Values are layered: command-line overrides win over environment
//! variables, which win over the JSON config file, which wins over defaults.

use crate::error::{PipelineError, Result};
use crate::vcf_metrics::MalformedLinePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const BWA_ENV_BIN: &str = "VARIANT_PIPELINE_BWA";
pub const SAMTOOLS_ENV_BIN: &str = "VARIANT_PIPELINE_SAMTOOLS";
pub const BCFTOOLS_ENV_BIN: &str = "VARIANT_PIPELINE_BCFTOOLS";

/// Executable names or paths for the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub bwa: String,
    pub samtools: String,
    pub bcftools: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            bwa: "bwa".to_string(),
            samtools: "samtools".to_string(),
            bcftools: "bcftools".to_string(),
        }
    }
}

impl ToolPaths {
    /// Replace tool names with any set environment overrides
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |slot: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        };
        set(&mut self.bwa, BWA_ENV_BIN);
        set(&mut self.samtools, SAMTOOLS_ENV_BIN);
        set(&mut self.bcftools, BCFTOOLS_ENV_BIN);
    }
}

/// Contents of an optional JSON config file; every field may be omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bwa_reference: Option<PathBuf>,
    pub pileup_reference: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub tools: ToolPaths,
    pub malformed_lines: MalformedLinePolicy,
}

impl ConfigFile {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bwa_reference: Option<PathBuf>,
    pub pileup_reference: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub malformed_lines: Option<MalformedLinePolicy>,
}

/// Fully resolved settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sample_name: String,
    pub bwa_reference: PathBuf,
    pub pileup_reference: PathBuf,
    pub work_dir: PathBuf,
    pub tools: ToolPaths,
    pub malformed_lines: MalformedLinePolicy,
}

impl PipelineConfig {
    pub fn new(
        sample_name: impl Into<String>,
        bwa_reference: impl Into<PathBuf>,
        pileup_reference: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sample_name: sample_name.into(),
            bwa_reference: bwa_reference.into(),
            pileup_reference: pileup_reference.into(),
            work_dir: PathBuf::from("."),
            tools: ToolPaths::default(),
            malformed_lines: MalformedLinePolicy::default(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Merge file, environment and command-line values into one config
    pub fn resolve<F>(
        sample_name: &str,
        file: ConfigFile,
        overrides: Overrides,
        env_lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tools = file.tools;
        tools.apply_env(env_lookup);

        let bwa_reference = overrides
            .bwa_reference
            .or(file.bwa_reference)
            .ok_or_else(|| PipelineError::Config("no alignment reference (--bwa-ref) configured".to_string()))?;
        let pileup_reference = overrides
            .pileup_reference
            .or(file.pileup_reference)
            .ok_or_else(|| PipelineError::Config("no pileup reference (--pileup-ref) configured".to_string()))?;

        Ok(Self {
            sample_name: sample_name.to_string(),
            bwa_reference,
            pileup_reference,
            work_dir: overrides
                .work_dir
                .or(file.work_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            tools,
            malformed_lines: overrides.malformed_lines.unwrap_or(file.malformed_lines),
        })
    }

    /// Resolve using the process environment
    pub fn from_sources(sample_name: &str, file: ConfigFile, overrides: Overrides) -> Result<Self> {
        Self::resolve(sample_name, file, overrides, |key| std::env::var(key).ok())
    }
}
