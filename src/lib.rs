//! Variant Pipeline
//!
//! Runs a paired-end variant calling workflow through external tools and
//! summarises the resulting VCF.
//!
//! This library provides:
//! - Conventional per-sample file layout
//! - Structured, shell-free tool invocation with exit status checks
//! - Stage orchestration (bwa mem, samtools sort, samtools mpileup | bcftools call)
//! - Streaming mean QUAL computation over VCF files

pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod sample;
pub mod vcf_metrics;

pub use config::{ConfigFile, Overrides, PipelineConfig, ToolPaths};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineSummary, Stage, VariantPipeline};
pub use runner::{CommandRunner, Invocation, ProcessRunner, StageStatus, ToolCommand};
pub use sample::SampleFiles;
pub use vcf_metrics::{MalformedLinePolicy, QualAnalyzer, QualSummary};

use std::path::Path;

/// Write a pipeline summary as pretty-printed JSON
pub fn export_summary_json<P: AsRef<Path>>(summary: &PipelineSummary, path: P) -> anyhow::Result<()> {
    let json_content = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json_content)?;
    Ok(())
}
