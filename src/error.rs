//! Error types for the variant calling pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Sample identifier was empty or blank.
    #[error("sample name must not be empty")]
    EmptySample,

    /// Configuration could not be loaded or is incomplete.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A required input file is absent before any tool is launched.
    #[error("required input not found: {}", path.display())]
    MissingInput { path: PathBuf },

    /// An external executable could not be started.
    #[error("failed to launch '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("bwa mem failed ({})", describe_code(*code))]
    AlignerFailed { code: Option<i32> },

    #[error("samtools sort failed ({})", describe_code(*code))]
    SortFailed { code: Option<i32> },

    #[error("samtools mpileup | bcftools call failed ({})", describe_code(*code))]
    CallerFailed { code: Option<i32> },

    /// A stage reported success but did not produce its declared output.
    #[error("{stage} stage finished but {} was not created", path.display())]
    MissingOutput { stage: Stage, path: PathBuf },

    /// Malformed VCF data line.
    #[error("malformed VCF record at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl PipelineError {
    /// Process exit code reported for this class of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Io(_) => 1,
            PipelineError::EmptySample | PipelineError::Config(_) => 2,
            PipelineError::MissingInput { .. } => 3,
            PipelineError::Spawn { .. } => 4,
            PipelineError::AlignerFailed { .. } => 10,
            PipelineError::SortFailed { .. } => 11,
            PipelineError::CallerFailed { .. } => 12,
            PipelineError::MissingOutput { .. } => 13,
            PipelineError::Parse { .. } => 20,
        }
    }

    /// Build the stage-specific failure for a non-zero exit
    pub fn stage_failed(stage: Stage, code: Option<i32>) -> Self {
        match stage {
            Stage::Align => PipelineError::AlignerFailed { code },
            Stage::Sort => PipelineError::SortFailed { code },
            Stage::CallVariants => PipelineError::CallerFailed { code },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
