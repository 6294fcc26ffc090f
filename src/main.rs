//! Main entry point for selfextract.
//!
//! The same binary is the archive builder and every archive it builds: it
//! inspects its own file and either parses builder flags or runs the
//! embedded payload.

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error};

use selfextract::{Cli, Config, LocalFileReader, SelfImage, lifecycle, logging};

/// Application entry point and the only place the process is terminated.
#[tokio::main]
async fn main() {
    let config = Config::from_env();
    logging::init(config.verbose);

    let code = match run(config).await {
        Ok(code) => code,
        Err(err) => {
            error!("FATAL: {err:#}");
            1
        }
    };
    process::exit(code);
}

/// Dispatch on what the executable turned out to be.
async fn run(config: Config) -> Result<i32> {
    let exe = std::env::current_exe().context("locating itself")?;
    let reader = LocalFileReader::new(&exe).context("opening itself")?;

    match SelfImage::identify(reader)? {
        SelfImage::Builder { stub } => {
            let cli = Cli::parse();
            if cli.verbose {
                logging::set_verbose(true);
            }
            create(stub, cli).await?;
            Ok(0)
        }
        SelfImage::Extractor { key, payload, .. } => {
            let args = std::env::args_os().skip(1).collect();
            lifecycle::run(&config, key, payload, args).await
        }
    }
}

/// Builder mode: write the archive on the blocking pool.
///
/// # Arguments
///
/// * `stub` - This executable's own image, copied to the front of the archive
/// * `cli` - Parsed builder flags
async fn create(stub: Vec<u8>, cli: Cli) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || {
        selfextract::build(&stub, &cli.output, &cli.files, &cli.change_dir)
    })
    .await
    .context("build task failed")??;

    debug!(
        "created {} ({} entries, key {})",
        report.output.display(),
        report.entries,
        report.key
    );
    Ok(())
}
