//! Main entry point for the setops CLI
//!
//! The pipeline runs on a background worker thread; this thread consumes
//! the event channel, renders progress, and prints the final summary.

use clap::Parser;
use setops::cli::Cli;
use setops::progress::ProgressReporter;
use setops::{CancelToken, EventSink, Pipeline, Result, RunSummary, SetOpsError};

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(&cli) {
        Ok(summary) => print_summary(&cli, &summary),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let plan = cli.plan()?;
    let config = cli.pipeline_config();

    let (events, receiver) = EventSink::channel();
    let cancel = CancelToken::new();
    let mut pipeline = Pipeline::new(config, events, cancel.clone());

    // Ctrl-C requests a cooperative stop; the worker winds down at the next
    // chunk boundary and teardown still runs
    let interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupt received; stopping after the current chunk");
        interrupt.raise();
    }) {
        log::warn!("Could not install interrupt handler: {}", e);
    }

    let worker = std::thread::spawn(move || pipeline.run(&plan));

    // The channel closes when the worker drops the pipeline
    let mut reporter = ProgressReporter::new(!cli.json);
    for event in receiver {
        reporter.handle(&event);
    }
    reporter.finish();

    worker
        .join()
        .map_err(|_| SetOpsError::store("Pipeline worker panicked"))?
}

fn print_summary(cli: &Cli, summary: &RunSummary) {
    if cli.json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }

    if summary.cancelled {
        println!("Run cancelled; partial counts below.");
    }
    println!(
        "Imported side A: {} rows ({} distinct) from {} file(s)",
        summary.rows_imported_a,
        summary.distinct_a,
        summary.file_stats_a.len()
    );
    println!(
        "Imported side B: {} rows ({} distinct) from {} file(s)",
        summary.rows_imported_b,
        summary.distinct_b,
        summary.file_stats_b.len()
    );
    println!(
        "{}: {} rows, {} exported to {} in {:.1}s",
        summary.operation,
        summary.result_rows,
        summary.rows_exported,
        cli.output.display(),
        summary.elapsed_secs
    );
}
