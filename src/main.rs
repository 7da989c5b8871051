//! assetpipe - front-end asset pipeline
//!
//! Compiles Sass, optimizes images and renders templates into `dist/`, then
//! watches the sources and live-reloads the browser.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

mod cli;

use assetpipe::executor::print_summary;
use assetpipe::notifier::{ConsoleNotifier, SharedNotifier};
use assetpipe::paths::Category;
use assetpipe::{Config, Pipeline, Result};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flags
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .without_time()
        .init();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    let (config, root) = Config::load(cli.config.as_deref())?;
    let notifier: SharedNotifier = Arc::new(ConsoleNotifier);
    let pipeline = Pipeline::new(&config, &root, notifier)?;

    let command = cli.effective_command();
    let flow = match (command, command.step()) {
        (_, Some(step)) => pipeline.step(step),
        (Commands::Check, None) => {
            print_check(&pipeline, &config, &root);
            return Ok(());
        }
        (Commands::Dev, None) => pipeline.default_flow(),
        (_, None) => pipeline.initial_build(),
    };

    tracing::debug!(?flow, "running");

    tokio::select! {
        results = flow.run() => {
            let results = results?;
            if !cli.quiet {
                print_summary(&results);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{} Interrupted", style("⏹").yellow());
        }
    }

    Ok(())
}

/// Print the resolved layout
fn print_check(pipeline: &Pipeline, config: &Config, root: &Path) {
    let table = pipeline.table();

    println!("{} Configuration is valid", style("✓").green().bold());
    println!();
    println!("  {:<10} {}", style("root").bold(), root.display());

    for category in Category::ALL {
        let entry = table.entry(category);
        println!(
            "  {:<10} {} {} {}",
            style(category).cyan().bold(),
            entry.source,
            style("→").dim(),
            entry.dest.display()
        );
    }

    println!(
        "  {:<10} {} {}",
        style("data").cyan().bold(),
        table.data_file.display(),
        style(format!("(watching {})", table.data_watch)).dim()
    );
    println!(
        "  {:<10} http://{}",
        style("server").cyan().bold(),
        config.server.addr()
    );
}
