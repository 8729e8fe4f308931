//! Variant Pipeline Runner
//!
//! Aligns a paired-end sample with bwa mem, sorts with samtools, calls variants
//! with samtools mpileup | bcftools call, and reports the mean QUAL score.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use variant_pipeline::{
    export_summary_json, ConfigFile, MalformedLinePolicy, Overrides, PipelineConfig, PipelineError,
    ProcessRunner, VariantPipeline,
};

fn build_cli() -> Command {
    Command::new("variant-pipeline")
        .version("0.1.0")
        .about("Paired-end variant calling pipeline with mean QUAL summary")
        .author("Megan Johnson")
        .arg(
            Arg::new("input_sample_name")
                .short('i')
                .long("input-sample-name")
                .visible_alias("input_sample_name")
                .value_name("NAME")
                .help("Base sample name (reads are <NAME>_1.fq.gz and <NAME>_2.fq.gz)")
                .required(true),
        )
        .arg(
            Arg::new("bwa_ref")
                .long("bwa-ref")
                .value_name("FASTA")
                .help("bwa-indexed alignment reference"),
        )
        .arg(
            Arg::new("pileup_ref")
                .long("pileup-ref")
                .value_name("FASTA")
                .help("faidx-indexed reference for samtools mpileup"),
        )
        .arg(
            Arg::new("work_dir")
                .short('d')
                .long("work-dir")
                .value_name("DIRECTORY")
                .help("Directory holding the sample's input and output files [default: .]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("JSON")
                .help("JSON config file with references, tools and work directory"),
        )
        .arg(
            Arg::new("skip_malformed")
                .long("skip-malformed")
                .action(ArgAction::SetTrue)
                .help("Skip VCF records with an unreadable QUAL instead of failing"),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .value_name("JSON")
                .help("Also write the run summary to a JSON file"),
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Print the tool invocations without running them"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
        )
}

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn resolve_config(matches: &ArgMatches) -> Result<PipelineConfig> {
    let sample_name = matches.get_one::<String>("input_sample_name").unwrap();

    let file = match matches.get_one::<String>("config") {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let overrides = Overrides {
        bwa_reference: matches.get_one::<String>("bwa_ref").map(PathBuf::from),
        pileup_reference: matches.get_one::<String>("pileup_ref").map(PathBuf::from),
        work_dir: matches.get_one::<String>("work_dir").map(PathBuf::from),
        malformed_lines: matches
            .get_flag("skip_malformed")
            .then_some(MalformedLinePolicy::Skip),
    };

    Ok(PipelineConfig::from_sources(sample_name, file, overrides)?)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches)?;
    log::info!("Sample: {}", config.sample_name);
    log::info!("Alignment reference: {}", config.bwa_reference.display());
    log::info!("Pileup reference: {}", config.pileup_reference.display());
    log::info!("Working directory: {}", config.work_dir.display());

    let mut pipeline = VariantPipeline::new(config, ProcessRunner)?;

    if matches.get_flag("dry_run") {
        for (_, invocation) in pipeline.plan() {
            println!("{}", invocation);
        }
        return Ok(());
    }

    let summary = pipeline.run()?;

    if let Some(stats_path) = matches.get_one::<String>("stats") {
        export_summary_json(&summary, stats_path)
            .with_context(|| format!("failed to write summary to {}", stats_path))?;
        log::info!("Summary saved to: {}", stats_path);
    }

    println!("Average QUAL score: {:.2}", summary.mean_qual);
    Ok(())
}

fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_count("verbose"));

    if let Err(err) = run(&matches) {
        println!("An error occurred: {:#}", err);
        let code = err
            .downcast_ref::<PipelineError>()
            .map_or(1, PipelineError::exit_code);
        std::process::exit(code);
    }
}
