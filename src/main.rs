//! Acelera CLI - offloaded matrix-vector multiply
//!
//! Reproduces the reference run: allocate a matrix and two vectors on the
//! accelerator, fill them on the device, multiply, and optionally pull every
//! buffer back to check it against a host reference.
//!
//! ```text
//! acelera --rows 128 --cols 256 --verify
//! ```

use std::process::ExitCode;
use std::time::Instant;

use acelera::{
    fill, multiply_with, reference_matvec, Accelerator, AcceleratorConfig, LaunchConfig, Matrix,
    Result, TransferStats, Vector, Verifier, VerifyReport,
};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};

/// Acelera - dense matrix-vector multiply on an accelerator
#[derive(Parser, Debug)]
#[command(name = "acelera")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Matrix rows (output length)
    #[arg(long, default_value = "128")]
    rows: usize,

    /// Matrix columns (input vector length)
    #[arg(long, default_value = "256")]
    cols: usize,

    /// Value written to every matrix element
    #[arg(long, default_value = "1.0")]
    matrix_value: f32,

    /// Value written to every input vector element
    #[arg(long, default_value = "2.0")]
    vector_value: f32,

    /// Input vector length (defaults to --cols)
    #[arg(long)]
    vector_len: Option<usize>,

    /// Coarse-grained execution units (overrides ACELERA_GANGS)
    #[arg(short, long)]
    gangs: Option<usize>,

    /// Fine-grained lanes per reduction (overrides ACELERA_VECTOR_LENGTH)
    #[arg(long)]
    vector_length: Option<usize>,

    /// Device memory capacity in bytes, 0 = unlimited
    #[arg(long)]
    device_memory: Option<usize>,

    /// JSON accelerator config file (applied before flag overrides)
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Pull all buffers back and compare against a host reference
    #[arg(long)]
    verify: bool,

    /// Relative tolerance for --verify
    #[arg(long, default_value = "1e-5")]
    tolerance: f32,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    rows: usize,
    cols: usize,
    multiplied: bool,
    launch: LaunchConfig,
    elapsed_us: u128,
    first_output: Option<f32>,
    transfers: TransferStats,
    reports: Vec<VerifyReport>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(summary) => {
            print_summary(&summary, cli.json);
            if summary.multiplied && summary.reports.iter().all(VerifyReport::passed) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        },
    }
}

fn build_config(cli: &Cli) -> Result<AcceleratorConfig> {
    let mut config = match &cli.config {
        Some(path) => AcceleratorConfig::from_json_file(path)?,
        None => AcceleratorConfig::from_env()?,
    };
    if let Some(gangs) = cli.gangs {
        config = config.with_gangs(gangs);
    }
    if let Some(vector_length) = cli.vector_length {
        config = config.with_vector_length(vector_length);
    }
    if let Some(bytes) = cli.device_memory {
        config = config.with_device_memory_bytes(bytes);
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let acc = Accelerator::new(build_config(cli)?)?;
    let launch = acc.launch_config();
    info!(
        rows = cli.rows,
        cols = cli.cols,
        gangs = launch.gangs,
        vector_length = launch.vector_length,
        "starting matvec"
    );

    let mut mat = Matrix::new(&acc, cli.rows, cli.cols)?;
    let mut vec = Vector::new(&acc, cli.vector_len.unwrap_or(cli.cols))?;
    let mut out = Vector::new(&acc, cli.rows)?;

    fill(&mut mat, cli.matrix_value)?;
    fill(&mut vec, cli.vector_value)?;
    fill(&mut out, 0.0)?;

    let start = Instant::now();
    let multiplied = match multiply_with(&mat, &vec, &mut out, launch) {
        Ok(()) => true,
        Err(e) if e.is_recoverable() => {
            warn!("{e}; output left unchanged");
            false
        },
        Err(e) => return Err(e),
    };
    let elapsed_us = start.elapsed().as_micros();

    let mut reports = Vec::new();
    if cli.verify {
        let verifier = Verifier::new(cli.tolerance);
        let mat_expected = vec![cli.matrix_value; mat.len()];
        let vec_expected = vec![cli.vector_value; vec.len()];
        reports.push(verifier.check_matrix(&mut mat, "mat", &mat_expected)?);
        reports.push(verifier.check_vector(&mut vec, "vec", &vec_expected)?);
        let out_expected = if multiplied {
            reference_matvec(mat.host(), vec.as_slice(), mat.rows(), mat.cols())?
        } else {
            vec![0.0; out.len()]
        };
        reports.push(verifier.check_vector(&mut out, "out", &out_expected)?);
        for report in reports.iter().filter(|r| !r.passed()) {
            error!(
                name = %report.name,
                mismatches = report.mismatches,
                max_abs_error = report.max_abs_error,
                "verification failed"
            );
        }
    } else {
        out.pull_to_host()?;
    }

    Ok(RunSummary {
        rows: mat.rows(),
        cols: mat.cols(),
        multiplied,
        launch,
        elapsed_us,
        first_output: out.get(0),
        transfers: acc.transfer_stats(),
        reports,
    })
}

fn print_summary(summary: &RunSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{text}"),
            Err(e) => error!("failed to serialize summary: {e}"),
        }
        return;
    }

    println!("matvec {}x{}", summary.rows, summary.cols);
    println!(
        "  launch:   {} gangs x {} lanes",
        summary.launch.gangs, summary.launch.vector_length
    );
    println!("  elapsed:  {} µs", summary.elapsed_us);
    if let Some(y) = summary.first_output {
        println!("  out[0]:   {y}");
    }
    println!(
        "  transfers: {} H2D ({} B), {} D2H ({} B), {} launches",
        summary.transfers.host_to_device_count,
        summary.transfers.host_to_device_bytes,
        summary.transfers.device_to_host_count,
        summary.transfers.device_to_host_bytes,
        summary.transfers.kernel_launches
    );
    for report in &summary.reports {
        println!(
            "  check {:<4} {} ({} elements, max abs error {:e})",
            report.name,
            if report.passed() { "PASS" } else { "FAIL" },
            report.checked,
            report.max_abs_error
        );
    }
}
