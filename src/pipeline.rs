//! Variant calling pipeline orchestration
//!
//! Runs three external stages in a fixed order, each consuming the previous
//! stage's output file:
//! - align: `bwa mem` writes `<id>.sam`
//! - sort: `samtools sort` writes `<id>_s.bam`
//! - call variants: `samtools mpileup | bcftools call` writes `<id>.vcf`
//!
//! The VCF is then summarised by [`QualAnalyzer`]. A stage only starts once
//! the previous one exited successfully and left its output on disk.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::runner::{CommandRunner, Invocation, ToolCommand};
use crate::sample::SampleFiles;
use crate::vcf_metrics::QualAnalyzer;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Align,
    Sort,
    CallVariants,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Align, Stage::Sort, Stage::CallVariants];

    /// Files this stage reads, besides reference data
    pub fn inputs<'a>(&self, files: &'a SampleFiles) -> Vec<&'a Path> {
        match self {
            Stage::Align => vec![files.reads_1.as_path(), files.reads_2.as_path()],
            Stage::Sort => vec![files.sam.as_path()],
            Stage::CallVariants => vec![files.sorted_bam.as_path()],
        }
    }

    pub fn output<'a>(&self, files: &'a SampleFiles) -> &'a Path {
        match self {
            Stage::Align => &files.sam,
            Stage::Sort => &files.sorted_bam,
            Stage::CallVariants => &files.vcf,
        }
    }

    pub fn invocation(&self, config: &PipelineConfig, files: &SampleFiles) -> Invocation {
        let tools = &config.tools;
        match self {
            Stage::Align => Invocation::Single(
                ToolCommand::new(&tools.bwa)
                    .arg("mem")
                    .arg(&config.bwa_reference)
                    .arg(&files.reads_1)
                    .arg(&files.reads_2)
                    .stdout_to(&files.sam),
            ),
            Stage::Sort => Invocation::Single(
                ToolCommand::new(&tools.samtools)
                    .arg("sort")
                    .arg(&files.sam)
                    .arg("-o")
                    .arg(&files.sorted_bam),
            ),
            Stage::CallVariants => Invocation::Pipe {
                upstream: ToolCommand::new(&tools.samtools)
                    .arg("mpileup")
                    .arg("-Ou")
                    .arg("-f")
                    .arg(&config.pileup_reference)
                    .arg(&files.sorted_bam),
                downstream: ToolCommand::new(&tools.bcftools)
                    .arg("call")
                    .arg("-vmO")
                    .arg("v")
                    .arg("-o")
                    .arg(&files.vcf),
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Align => "align",
            Stage::Sort => "sort",
            Stage::CallVariants => "call-variants",
        };
        f.write_str(name)
    }
}

/// Result of a completed pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub sample_name: String,
    pub vcf_path: PathBuf,
    pub stages_completed: Vec<Stage>,
    pub mean_qual: f64,
    pub records: u64,
    pub skipped_records: u64,
}

pub struct VariantPipeline<R: CommandRunner> {
    config: PipelineConfig,
    files: SampleFiles,
    runner: R,
}

impl<R: CommandRunner> VariantPipeline<R> {
    pub fn new(config: PipelineConfig, runner: R) -> Result<Self> {
        let files = SampleFiles::new(&config.sample_name, &config.work_dir)?;
        Ok(Self {
            config,
            files,
            runner,
        })
    }

    pub fn files(&self) -> &SampleFiles {
        &self.files
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Ordered stage invocations, without running anything
    pub fn plan(&self) -> Vec<(Stage, Invocation)> {
        Stage::ALL
            .iter()
            .map(|&stage| (stage, stage.invocation(&self.config, &self.files)))
            .collect()
    }

    /// Verify reads are readable and references exist before launching tools
    pub fn check_inputs(&self) -> Result<()> {
        for reads in self.files.inputs() {
            File::open(reads).map_err(|_| PipelineError::MissingInput {
                path: reads.to_path_buf(),
            })?;
        }
        for reference in [&self.config.bwa_reference, &self.config.pileup_reference] {
            if !reference.exists() {
                return Err(PipelineError::MissingInput {
                    path: reference.clone(),
                });
            }
        }
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, invocation: &Invocation) -> Result<()> {
        info!("Starting {} stage", stage);
        debug!("{}: {}", stage, invocation);

        let status = self.runner.run(invocation)?;
        if !status.success {
            return Err(PipelineError::stage_failed(stage, status.code));
        }

        let output = stage.output(&self.files);
        if !output.exists() {
            return Err(PipelineError::MissingOutput {
                stage,
                path: output.to_path_buf(),
            });
        }
        info!("Finished {} stage: {}", stage, output.display());
        Ok(())
    }

    /// Run all stages in order, then summarise the QUAL column of the VCF
    pub fn run(&mut self) -> Result<PipelineSummary> {
        self.check_inputs()?;

        let mut stages_completed = Vec::with_capacity(Stage::ALL.len());
        for (stage, invocation) in self.plan() {
            self.run_stage(stage, &invocation)?;
            stages_completed.push(stage);
        }

        let analyzer = QualAnalyzer::new(self.config.malformed_lines);
        let qual = analyzer.analyze_vcf(&self.files.vcf)?;
        info!(
            "Summarised {} variant records ({} skipped)",
            qual.records, qual.skipped
        );

        Ok(PipelineSummary {
            sample_name: self.files.sample_name.clone(),
            vcf_path: self.files.vcf.clone(),
            stages_completed,
            mean_qual: qual.mean_qual,
            records: qual.records,
            skipped_records: qual.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StageStatus;
    use crate::vcf_metrics::MalformedLinePolicy;
    use std::ffi::OsString;
    use std::fs;
    use tempfile::TempDir;

    const VCF_BODY: &str = "##fileformat=VCFv4.2\n\
                            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                            chr1\t1\t.\tA\tT\t30.0\t.\t.\n\
                            chr1\t2\t.\tA\tT\t40.0\t.\t.\n";

    /// Records invocations and fakes the files each tool would write
    struct StubRunner {
        calls: Vec<Invocation>,
        fail_on_call: Option<(usize, i32)>,
        write_outputs: bool,
        vcf_body: String,
    }

    impl StubRunner {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_on_call: None,
                write_outputs: true,
                vcf_body: VCF_BODY.to_string(),
            }
        }

        fn declared_output(cmd: &ToolCommand) -> Option<PathBuf> {
            if let Some(path) = &cmd.stdout {
                return Some(path.clone());
            }
            let dash_o = OsString::from("-o");
            cmd.args
                .iter()
                .position(|arg| *arg == dash_o)
                .and_then(|idx| cmd.args.get(idx + 1))
                .map(PathBuf::from)
        }
    }

    impl CommandRunner for StubRunner {
        fn run(&mut self, invocation: &Invocation) -> Result<StageStatus> {
            let index = self.calls.len();
            self.calls.push(invocation.clone());

            if let Some((fail_index, code)) = self.fail_on_call {
                if fail_index == index {
                    return Ok(StageStatus::failed(code));
                }
            }

            if self.write_outputs {
                let last = match invocation {
                    Invocation::Single(cmd) => cmd,
                    Invocation::Pipe { downstream, .. } => downstream,
                };
                if let Some(path) = Self::declared_output(last) {
                    let body = if path.extension().map_or(false, |e| e == "vcf") {
                        self.vcf_body.as_str()
                    } else {
                        "stub"
                    };
                    fs::write(path, body)?;
                }
            }
            Ok(StageStatus::ok())
        }
    }

    fn setup(sample: &str) -> (TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("refs");
        fs::create_dir(&refs).unwrap();
        fs::write(refs.join("bwa.fa"), ">chr1\nACGT\n").unwrap();
        fs::write(refs.join("seq.fa"), ">chr1\nACGT\n").unwrap();
        fs::write(dir.path().join(format!("{}_1.fq.gz", sample)), "r1").unwrap();
        fs::write(dir.path().join(format!("{}_2.fq.gz", sample)), "r2").unwrap();

        let config = PipelineConfig::new(sample, refs.join("bwa.fa"), refs.join("seq.fa"))
            .with_work_dir(dir.path());
        (dir, config)
    }

    fn args_of(cmd: &ToolCommand) -> Vec<OsString> {
        cmd.args.clone()
    }

    #[test]
    fn test_plan_chains_paths_between_stages() {
        let (_dir, config) = setup("s1");
        let pipeline = VariantPipeline::new(config, StubRunner::new()).unwrap();
        let files = pipeline.files().clone();

        let stages: Vec<Stage> = pipeline.plan().into_iter().map(|(s, _)| s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());

        for pair in Stage::ALL.windows(2) {
            let produced = pair[0].output(&files);
            assert_eq!(pair[1].inputs(&files), vec![produced]);
        }
    }

    #[test]
    fn test_run_invokes_each_stage_once_in_order() {
        let (_dir, config) = setup("s1");
        let mut pipeline = VariantPipeline::new(config.clone(), StubRunner::new()).unwrap();
        let summary = pipeline.run().unwrap();
        let files = pipeline.files().clone();
        let calls = &pipeline.runner().calls;

        assert_eq!(calls.len(), 3);
        assert_eq!(summary.stages_completed, Stage::ALL.to_vec());
        assert_eq!(format!("{:.2}", summary.mean_qual), "35.00");
        assert_eq!(summary.records, 2);
        assert_eq!(summary.vcf_path, files.vcf);

        // align: references + both reads in, sam out
        let Invocation::Single(align) = &calls[0] else {
            panic!("align should be a single command")
        };
        assert_eq!(align.program, "bwa");
        assert_eq!(
            args_of(align),
            vec![
                OsString::from("mem"),
                config.bwa_reference.clone().into_os_string(),
                files.reads_1.clone().into_os_string(),
                files.reads_2.clone().into_os_string(),
            ]
        );
        assert_eq!(align.stdout.as_deref(), Some(files.sam.as_path()));

        // sort: sam in, bam out
        let Invocation::Single(sort) = &calls[1] else {
            panic!("sort should be a single command")
        };
        assert_eq!(sort.program, "samtools");
        assert_eq!(sort.args[0], OsString::from("sort"));
        assert_eq!(sort.args[1], files.sam.clone().into_os_string());
        assert_eq!(sort.args[3], files.sorted_bam.clone().into_os_string());

        // call: bam in through mpileup, vcf out of bcftools
        let Invocation::Pipe {
            upstream,
            downstream,
        } = &calls[2]
        else {
            panic!("variant calling should be a pipe")
        };
        assert_eq!(upstream.program, "samtools");
        assert_eq!(upstream.args[0], OsString::from("mpileup"));
        assert_eq!(upstream.args[3], config.pileup_reference.clone().into_os_string());
        assert_eq!(upstream.args.last(), Some(&files.sorted_bam.clone().into_os_string()));
        assert!(upstream.stdout.is_none());
        assert_eq!(downstream.program, "bcftools");
        assert_eq!(downstream.args.last(), Some(&files.vcf.clone().into_os_string()));
    }

    #[test]
    fn test_custom_tool_names_are_used() {
        let (_dir, mut config) = setup("s1");
        config.tools.bwa = "/opt/bwa-mem2".to_string();
        config.tools.bcftools = "bcftools-1.20".to_string();
        let pipeline = VariantPipeline::new(config, StubRunner::new()).unwrap();

        let programs: Vec<Vec<String>> = pipeline
            .plan()
            .iter()
            .map(|(_, inv)| inv.programs().into_iter().map(String::from).collect())
            .collect();
        assert_eq!(
            programs,
            vec![
                vec!["/opt/bwa-mem2".to_string()],
                vec!["samtools".to_string()],
                vec!["samtools".to_string(), "bcftools-1.20".to_string()],
            ]
        );
    }

    #[test]
    fn test_failed_stage_stops_pipeline() {
        let (_dir, config) = setup("s1");
        let mut runner = StubRunner::new();
        runner.fail_on_call = Some((1, 2));
        let mut pipeline = VariantPipeline::new(config, runner).unwrap();

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::SortFailed { code: Some(2) }));
        assert_eq!(pipeline.runner().calls.len(), 2);
    }

    #[test]
    fn test_failed_caller_reported() {
        let (_dir, config) = setup("s1");
        let mut runner = StubRunner::new();
        runner.fail_on_call = Some((2, 1));
        let mut pipeline = VariantPipeline::new(config, runner).unwrap();

        let err = pipeline.run().unwrap_err();
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn test_missing_stage_output_detected() {
        let (_dir, config) = setup("s1");
        let mut runner = StubRunner::new();
        runner.write_outputs = false;
        let mut pipeline = VariantPipeline::new(config, runner).unwrap();

        let err = pipeline.run().unwrap_err();
        match err {
            PipelineError::MissingOutput { stage, path } => {
                assert_eq!(stage, Stage::Align);
                assert!(path.ends_with("s1.sam"));
            }
            other => panic!("expected missing output, got {:?}", other),
        }
        assert_eq!(pipeline.runner().calls.len(), 1);
    }

    #[test]
    fn test_missing_reads_prevent_any_invocation() {
        let (dir, config) = setup("s1");
        fs::remove_file(dir.path().join("s1_2.fq.gz")).unwrap();
        let mut pipeline = VariantPipeline::new(config, StubRunner::new()).unwrap();

        let err = pipeline.run().unwrap_err();
        match err {
            PipelineError::MissingInput { path } => assert!(path.ends_with("s1_2.fq.gz")),
            other => panic!("expected missing input, got {:?}", other),
        }
        assert!(pipeline.runner().calls.is_empty());
    }

    #[test]
    fn test_missing_reference_prevents_any_invocation() {
        let (dir, config) = setup("s1");
        fs::remove_file(dir.path().join("refs").join("seq.fa")).unwrap();
        let mut pipeline = VariantPipeline::new(config, StubRunner::new()).unwrap();

        assert!(matches!(pipeline.run(), Err(PipelineError::MissingInput { .. })));
        assert!(pipeline.runner().calls.is_empty());
    }

    #[test]
    fn test_malformed_vcf_policy_applies_to_run() {
        let body = "#h\nchr1\t1\t.\tA\tT\t20\t.\t.\nchr1\t2\t.\tA\tT\tNA\t.\t.\n";

        let (_dir, config) = setup("s1");
        let mut runner = StubRunner::new();
        runner.vcf_body = body.to_string();
        let mut pipeline = VariantPipeline::new(config, runner).unwrap();
        assert!(matches!(pipeline.run(), Err(PipelineError::Parse { line: 3, .. })));

        let (_dir, mut config) = setup("s1");
        config.malformed_lines = MalformedLinePolicy::Skip;
        let mut runner = StubRunner::new();
        runner.vcf_body = body.to_string();
        let mut pipeline = VariantPipeline::new(config, runner).unwrap();
        let summary = pipeline.run().unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.skipped_records, 1);
        assert_eq!(summary.mean_qual, 20.0);
    }

    #[test]
    fn test_empty_sample_rejected() {
        let config = PipelineConfig::new("", "a.fa", "b.fa");
        assert!(matches!(
            VariantPipeline::new(config, StubRunner::new()),
            Err(PipelineError::EmptySample)
        ));
    }

    #[test]
    fn test_summary_serializes_stage_names() {
        let summary = PipelineSummary {
            sample_name: "s1".to_string(),
            vcf_path: PathBuf::from("s1.vcf"),
            stages_completed: Stage::ALL.to_vec(),
            mean_qual: 35.0,
            records: 2,
            skipped_records: 0,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(r#""stages_completed":["align","sort","call-variants"]"#));
    }
}
