use anyhow::{Context, Result};
use clap::Parser;
use flow_gating::{
    BatchOptionsBuilder, GatePath, GatingStrategy, Parallelism, ReportRow, Sample, SampleData,
    StrategyDefinition, evaluate_batch_with,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// flowgate - Gating Strategy Evaluation for Flow Cytometry Data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "flowgate")]
#[command(about = "Apply a gating strategy to flow cytometry samples and report population counts", long_about = None)]
struct Cli {
    /// Gating strategy definition (JSON)
    #[arg(short, long, value_name = "STRATEGY_FILE")]
    strategy: PathBuf,

    /// Path(s) to sample JSON file(s) or directories containing them
    #[arg(value_name = "SAMPLE_FILES", required = true)]
    input: Vec<PathBuf>,

    /// Evaluate only this gate and the gates it depends on
    #[arg(long)]
    gate_id: Option<String>,

    /// Full path of the target gate (e.g. "/lymphocytes/singlets") when its id is ambiguous
    #[arg(long, requires = "gate_id")]
    gate_path: Option<GatePath>,

    /// Evaluate samples one after another on a single thread
    #[arg(long, conflicts_with = "workers")]
    sequential: bool,

    /// Maximum number of worker threads (default: available cores minus one)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Save the combined report as JSON
    #[arg(long, value_name = "REPORT_PATH")]
    report: Option<PathBuf>,

    /// Print the gate hierarchy before evaluating
    #[arg(long)]
    show_hierarchy: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn parallelism(&self) -> Parallelism {
        match (self.sequential, self.workers) {
            (true, _) => Parallelism::Disabled,
            (false, Some(n)) => Parallelism::MaxWorkers(n),
            (false, None) => Parallelism::Enabled,
        }
    }
}

/// A sample file that could not be evaluated
#[derive(Debug, Serialize)]
struct Failure {
    sample: String,
    kind: Option<String>,
    error: String,
}

/// JSON report written with `--report`
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    strategy: &'a Path,
    total_samples: usize,
    successful: usize,
    failed: usize,
    total_time_seconds: f64,
    rows: &'a [ReportRow],
    errors: &'a [Failure],
}

/// Collect all sample files from input paths (handles files and directories)
fn collect_input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            for entry in walkdir::WalkDir::new(input).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                let is_json = path
                    .extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
                if path.is_file() && is_json {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            return Err(anyhow::anyhow!("Path does not exist: {}", input.display()));
        }
    }

    Ok(files)
}

fn load_strategy(path: &Path) -> Result<GatingStrategy> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read strategy file {}", path.display()))?;
    let definition: StrategyDefinition = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse strategy file {}", path.display()))?;
    let strategy = GatingStrategy::from_definition(definition)
        .with_context(|| format!("Invalid gating strategy in {}", path.display()))?;
    Ok(strategy)
}

fn load_sample(path: &Path) -> Result<Sample> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sample file {}", path.display()))?;
    let sample: Sample = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse sample file {}", path.display()))?;
    Ok(sample)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn print_rows(rows: &[ReportRow]) {
    println!(
        "   {:<16} {:<40} {:>10} {:>9} {:>9}",
        "Sample", "Population", "Count", "% Total", "% Parent"
    );
    for row in rows {
        let indent = "  ".repeat(row.level.saturating_sub(1));
        println!(
            "   {:<16} {:<40} {:>10} {:>9.2} {:>9.2}",
            row.sample,
            format!("{indent}{}", row.gate_id),
            row.count,
            row.absolute_percent,
            row.relative_percent
        );
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber with environment filter
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Cli::parse();

    println!("🧬 flowgate - Gating Strategy Evaluation");
    println!("========================================\n");

    let start_time = Instant::now();

    let strategy = load_strategy(&args.strategy)?;
    info!(gates = strategy.len(), "Loaded gating strategy");
    if args.show_hierarchy {
        println!("{}", strategy.hierarchy_ascii());
    }

    let input_files = collect_input_files(&args.input)?;
    if input_files.is_empty() {
        eprintln!("❌ Error: No sample files found");
        std::process::exit(1);
    }
    println!("📂 Found {} sample file(s)\n", input_files.len());

    // Parse sample files in parallel, keeping input order
    let loaded: Vec<(PathBuf, Result<Sample>)> = input_files
        .par_iter()
        .map(|path| {
            debug!(file = %path.display(), "Loading sample");
            (path.clone(), load_sample(path))
        })
        .collect();

    let mut failures: Vec<Failure> = Vec::new();
    let mut units = Vec::with_capacity(loaded.len());
    for (path, sample) in loaded {
        match sample {
            Ok(sample) => {
                let unit_strategy = strategy.for_sample(sample.sample_id());
                units.push((unit_strategy, sample));
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable sample");
                failures.push(Failure {
                    sample: file_label(&path),
                    kind: None,
                    error: format!("{e:#}"),
                });
            }
        }
    }
    let total_samples = units.len() + failures.len();

    let mut options = BatchOptionsBuilder::default();
    options.parallelism(args.parallelism()).verbose(args.verbose);
    if let Some(gate_id) = &args.gate_id {
        options.gate_id(gate_id.as_str());
    }
    if let Some(gate_path) = &args.gate_path {
        options.gate_path(gate_path.clone());
    }
    let options = options.build()?;

    let results = evaluate_batch_with(units, &options);
    for (sample_id, err) in results.failures() {
        failures.push(Failure {
            sample: sample_id.to_string(),
            kind: Some(err.kind().to_string()),
            error: err.to_string(),
        });
    }
    let report = results.report();
    let successful = results.successes().count();

    let total_time = start_time.elapsed().as_secs_f64();
    println!("\n✅ Gating Complete!");
    println!("   Processed: {} sample(s)", total_samples);
    println!("   Successful: {}", successful);
    if !failures.is_empty() {
        println!("   Failed: {}", failures.len());
    }
    println!("   ⏱️  Total time: {:.2}s\n", total_time);

    if !report.is_empty() {
        println!("📊 Populations:");
        print_rows(report.rows());
        println!();
    }

    if !failures.is_empty() {
        eprintln!("❌ Errors:");
        for failure in &failures {
            match &failure.kind {
                Some(kind) => eprintln!("   {} [{}]: {}", failure.sample, kind, failure.error),
                None => eprintln!("   {}: {}", failure.sample, failure.error),
            }
        }
        eprintln!();
    }

    if let Some(report_path) = &args.report {
        let run_report = RunReport {
            strategy: &args.strategy,
            total_samples,
            successful,
            failed: failures.len(),
            total_time_seconds: total_time,
            rows: report.rows(),
            errors: &failures,
        };
        std::fs::write(report_path, serde_json::to_string_pretty(&run_report)?)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
        info!(path = %report_path.display(), "Saved report");
    }

    // Exit with error code if any sample failed
    if !failures.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}
