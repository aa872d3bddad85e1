use crate::cli::{BenchArgs, OutputFormat};
use anyhow::{Context, Result};
use console::style;
use perf_bench::bench_config::BenchRunConfig;
use perf_bench::reporting::{RunStatus, TextReportGenerator};
use perf_bench::runners::RunExpander;
use perf_bench::{BenchOutcome, BenchReport, BenchmarkRunner, ConfigManager, TaskCatalog};
use std::fs;
use tokio_util::sync::CancellationToken;

const EFFECTIVE_CONFIG_FILE: &str = "perf-bench-config.yaml";

/// Config file (if any) with the command-line flags laid over it
pub fn load_config(args: &BenchArgs) -> Result<ConfigManager> {
    let mut manager = match &args.config {
        Some(path) => ConfigManager::from_path(path)?,
        None => ConfigManager::new(BenchRunConfig::default())?,
    };
    manager.update(|config| args.apply(config))?;
    Ok(manager)
}

pub async fn run_benchmark(args: &BenchArgs) -> Result<BenchOutcome> {
    let manager = load_config(args)?;
    let runner = BenchmarkRunner::from_config(&manager)?;

    let output_dir = &manager.config().output_dir;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;
    manager
        .config()
        .save(&output_dir.join(EFFECTIVE_CONFIG_FILE))?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing in-flight runs and skipping the rest");
                cancel.cancel();
            }
        }
    });

    let report = runner.run(cancel).await;
    interrupt.abort();
    let report = report?;

    match args.format {
        OutputFormat::Text => print_text_report(&report),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "rows": report.rows,
                "results": report.results,
            }))?
        ),
    }

    Ok(report.outcome())
}

fn print_text_report(report: &BenchReport) {
    print!("{}", TextReportGenerator::render(&report.rows));
    println!();

    for result in report.results.iter().filter(|r| r.status == RunStatus::Failed) {
        let stage = result
            .stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} at {}: {}",
            style("failed").red().bold(),
            result.spec,
            stage,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    for err in report.group_errors() {
        println!("{} {}", style("error").red().bold(), err);
    }

    let summary = format!(
        "{} succeeded, {} failed, {} skipped",
        report.count(RunStatus::Success),
        report.count(RunStatus::Failed),
        report.count(RunStatus::Skipped)
    );
    match report.outcome() {
        BenchOutcome::Passed => println!("{}", style(summary).green()),
        BenchOutcome::RunsFailed => println!("{}", style(summary).yellow()),
    }
    if let Some(published) = &report.published {
        println!("summary: {}", style(published.path.display()).cyan());
        if let Some(staged) = &published.staged {
            println!("staged: {}", style(staged.display()).cyan());
        }
    }
}

/// Expand the request and print the runs; needs no pipeline commands
pub fn plan_benchmark(args: &BenchArgs) -> Result<()> {
    let manager = load_config(args)?;
    let config = manager.config();
    let request = manager.request()?;
    let catalog = TaskCatalog::load(&config.catalog_path()?, config.data_root.as_deref())?;
    let specs = RunExpander::expand(&request, &catalog)?;

    match args.format {
        OutputFormat::Text => {
            for spec in &specs {
                println!(
                    "{:>4}  {}  epoch={}  upto={}",
                    spec.index, spec, spec.epoch, spec.stage_cutoff
                );
            }
            println!("{}", style(format!("{} runs", specs.len())).bold());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&specs)?),
    }
    Ok(())
}
