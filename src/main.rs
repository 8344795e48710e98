//! treesync client: make the current directory (or --directory) match the
//! tree served by a treesync daemon.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use treesync::cli::ClientOpts;
use treesync::config::ClientConfig;
use treesync::logger::{FanoutLogger, Logger, TextLogger, TreePrinter};
use treesync::session::synchronize;
use treesync::SyncError;

fn main() -> ExitCode {
    // Exit immediately with 130 (128 + SIGINT); completed nodes stay as they are
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    }) {
        eprintln!("warning: cannot install Ctrl-C handler: {}", e);
    }

    let opts = ClientOpts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(opts: &ClientOpts) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config = ClientConfig::resolve(opts, &cwd)?;

    let mut logger = FanoutLogger::new();
    if !config.quiet {
        logger.push(Arc::new(TreePrinter::stdout()));
    }
    if let Some(ref p) = config.log_file {
        let text = TextLogger::new(p)
            .with_context(|| format!("Failed to open log file: {}", p.display()))?;
        logger.push(Arc::new(text));
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let stats = rt.block_on(synchronize(&config, &logger as &dyn Logger))?;

    if !config.quiet {
        println!(
            "done: {} fetched, {} unchanged, {} directories created, {} removed, {} bytes",
            stats.files_fetched,
            stats.files_up_to_date,
            stats.directories_created,
            stats.entries_removed,
            stats.bytes_fetched
        );
    }
    Ok(())
}

fn report(e: &anyhow::Error) {
    eprintln!("{}", failure_message(e));
}

fn failure_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<SyncError>() {
        Some(se) if se.is_remote_refusal() => format!(
            "treesync: {}: refused by the remote: {} ({})",
            se.path().unwrap_or("-"),
            se,
            se.kind()
        ),
        Some(se) => format!("treesync: {}: {} ({})", se.path().unwrap_or("-"), se, se.kind()),
        None => format!("treesync: {:#}", e),
    }
}
