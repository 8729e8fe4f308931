//! Conventional file layout for one paired-end sample

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Paths derived from a sample identifier inside a working directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFiles {
    pub sample_name: String,
    pub reads_1: PathBuf,
    pub reads_2: PathBuf,
    pub sam: PathBuf,
    pub sorted_bam: PathBuf,
    pub vcf: PathBuf,
}

impl SampleFiles {
    pub fn new<P: AsRef<Path>>(sample_name: &str, work_dir: P) -> Result<Self> {
        if sample_name.trim().is_empty() {
            return Err(PipelineError::EmptySample);
        }
        let dir = work_dir.as_ref();
        let file = |suffix: &str| dir.join(format!("{}{}", sample_name, suffix));

        Ok(Self {
            sample_name: sample_name.to_string(),
            reads_1: file("_1.fq.gz"),
            reads_2: file("_2.fq.gz"),
            sam: file(".sam"),
            sorted_bam: file("_s.bam"),
            vcf: file(".vcf"),
        })
    }

    pub fn inputs(&self) -> [&Path; 2] {
        [self.reads_1.as_path(), self.reads_2.as_path()]
    }
}
