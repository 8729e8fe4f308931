//! VCF QUAL metrics
//!
//! Single-pass scan over a VCF text file that folds the QUAL column of
//! every data line into a running sum and count:
//! - metadata lines (`#` prefix) and blank lines are skipped
//! - field 5 (0-indexed) of each remaining tab-separated line is the QUAL
//! - the mean is 0 when no data lines were seen

use crate::error::{PipelineError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const METADATA_MARKER: char = '#';
pub const QUAL_COLUMN: usize = 5;

/// What to do with a data line whose QUAL cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Fail the scan with a parse error
    #[default]
    Abort,
    /// Leave the line out of the mean and count it as skipped
    Skip,
}

/// Running (sum, count) registers
#[derive(Debug, Clone, Copy, Default)]
pub struct QualAccumulator {
    total_qual: f64,
    total_count: u64,
}

impl QualAccumulator {
    pub fn add(&mut self, qual: f64) {
        self.total_qual += qual;
        self.total_count += 1;
    }

    pub fn count(&self) -> u64 {
        self.total_count
    }

    pub fn mean(&self) -> f64 {
        if self.total_count > 0 {
            self.total_qual / self.total_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualSummary {
    pub mean_qual: f64,
    pub records: u64,
    pub skipped: u64,
}

/// Extract the QUAL value from one data line
pub fn parse_qual(line: &str) -> std::result::Result<f64, String> {
    let field = line
        .split('\t')
        .nth(QUAL_COLUMN)
        .ok_or_else(|| format!("expected at least {} tab-separated fields", QUAL_COLUMN + 1))?;

    let qual: f64 = field
        .parse()
        .map_err(|_| format!("QUAL '{}' is not a number", field))?;

    if !qual.is_finite() {
        return Err(format!("QUAL '{}' is not a finite number", field));
    }
    Ok(qual)
}

pub struct QualAnalyzer {
    pub policy: MalformedLinePolicy,
}

impl Default for QualAnalyzer {
    fn default() -> Self {
        Self {
            policy: MalformedLinePolicy::Abort,
        }
    }
}

impl QualAnalyzer {
    pub fn new(policy: MalformedLinePolicy) -> Self {
        Self { policy }
    }

    /// Compute the mean QUAL of a VCF file on disk
    pub fn analyze_vcf<P: AsRef<Path>>(&self, vcf_path: P) -> Result<QualSummary> {
        let vcf_path = vcf_path.as_ref();
        debug!("Scanning QUAL column of {}", vcf_path.display());

        let file = File::open(vcf_path)?;
        self.scan(BufReader::new(file))
    }

    /// Compute the mean QUAL over any line-oriented VCF source
    pub fn scan<R: BufRead>(&self, reader: R) -> Result<QualSummary> {
        let mut acc = QualAccumulator::default();
        let mut skipped = 0u64;

        for (idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line_number = idx + 1;

            if line.starts_with(METADATA_MARKER) {
                continue;
            }
            let record = line.trim();
            if record.is_empty() {
                continue;
            }

            match parse_qual(record) {
                Ok(qual) => acc.add(qual),
                Err(reason) => match self.policy {
                    MalformedLinePolicy::Abort => {
                        return Err(PipelineError::Parse {
                            line: line_number,
                            reason,
                        });
                    }
                    MalformedLinePolicy::Skip => {
                        warn!("Skipping VCF line {}: {}", line_number, reason);
                        skipped += 1;
                    }
                },
            }
        }

        Ok(QualSummary {
            mean_qual: acc.mean(),
            records: acc.count(),
            skipped,
        })
    }
}
