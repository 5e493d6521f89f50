//! Binary entry point: `.env` loading, tracing setup, argument parsing and
//! mode dispatch into `qlc_compactor::Runner`, spec.md §4.8/§6. Everything
//! here is ambient plumbing — the CLI argument surface and `.env` loading
//! are explicitly out of scope for the core engine (spec.md §1) and are
//! the one part of this workspace allowed to be "just enough to drive it".

mod cli;

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use qlc_compactor::runner::RunnerMode;
use qlc_compactor::{Config, Runner};
use qlc_persist::{Blob, S3Blob};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    match dotenvy::dotenv() {
        Ok(path) => eprintln!("loaded environment from {}", path.display()),
        Err(dotenvy::Error::Io(_)) => {}
        Err(err) => eprintln!("warning: failed to parse .env: {err}"),
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "fatal error");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::InspectRawObject(args) = &cli.command {
        return inspect_raw_object(args).await;
    }

    let config = Config::from_env().context("loading S3 configuration from environment")?;
    let raw: Arc<dyn Blob> = Arc::new(
        S3Blob::connect(
            Some(&config.raw.endpoint),
            &config.raw.bucket,
            Some(&config.raw.access_key),
            Some(&config.raw.secret_key),
        )
        .await
        .context("connecting to raw object store")?,
    );
    let compact: Arc<dyn Blob> = Arc::new(
        S3Blob::connect(
            Some(&config.compact.endpoint),
            &config.compact.bucket,
            Some(&config.compact.access_key),
            Some(&config.compact.secret_key),
        )
        .await
        .context("connecting to compact object store")?,
    );

    let runner = Runner::new(raw, compact);
    install_shutdown_handler(runner.shutdown_flag());

    let is_quicktest = matches!(cli.command, Command::Quicktest(_));
    let (mode, filters) = match cli.command {
        Command::Daily(filters) => (RunnerMode::Daily, filters.into_filters()?),
        Command::CatchUp(filters) => (RunnerMode::CatchUp, filters.into_filters()?),
        Command::Backfill(args) => {
            let mode = args.into_mode();
            (mode, args.filters.into_filters()?)
        }
        Command::Cleanup(args) => (
            RunnerMode::Cleanup {
                from: args.from,
                to: args.to,
            },
            Default::default(),
        ),
        Command::Wipe(args) => (RunnerMode::Wipe { apply: args.apply }, Default::default()),
        Command::Quicktest(args) => {
            let filters = args.filters.into_filters()?;
            (
                RunnerMode::Quicktest {
                    partitions: args.partitions,
                    wipe_after: !args.no_wipe_after,
                },
                filters,
            )
        }
        Command::InspectRawObject(_) => unreachable!("handled above"),
    };

    let summary = runner.run(mode, &filters).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    // Exit codes per spec.md §6: 0 on success/idempotent no-op; non-zero on
    // unrecoverable partition failures, but only in quicktest mode, where a
    // hard failure means the smoke test itself failed.
    let exit_code = if summary.hard_failures > 0 && is_quicktest {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    };
    Ok(exit_code)
}

/// Registers a `ctrl_c` handler that flips the runner's cooperative
/// shutdown flag on the first signal; a second signal terminates the
/// process immediately rather than waiting for in-flight partitions to
/// notice, spec.md §4.8/§5 "Cancellation & timeouts".
fn install_shutdown_handler(flag: Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, finishing in-flight partitions");
            flag.store(true, Ordering::Relaxed);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("second shutdown signal received, terminating immediately");
            std::process::exit(130);
        }
    });
}

async fn inspect_raw_object(args: &cli::InspectArgs) -> Result<ExitCode> {
    let config = Config::from_env().context("loading S3 configuration from environment")?;
    let raw = S3Blob::connect(
        Some(&config.raw.endpoint),
        &config.raw.bucket,
        Some(&config.raw.access_key),
        Some(&config.raw.secret_key),
    )
    .await
    .context("connecting to raw object store")?;

    let Some(bytes) = raw.get(&args.key).await.context("fetching raw object")? else {
        eprintln!("object {} not found", args.key);
        return Ok(ExitCode::from(1));
    };

    let tmp = tempfile::NamedTempFile::new().context("creating scratch file")?;
    std::fs::write(tmp.path(), &bytes).context("writing scratch copy")?;

    let mut reader = std::io::BufReader::new(std::fs::File::open(tmp.path())?);
    let metadata = arrow2::io::parquet::read::read_metadata(&mut reader)
        .with_context(|| format!("{} is not a readable parquet file", args.key))?;
    let schema = arrow2::io::parquet::read::infer_schema(&metadata)?;

    info!(key = %args.key, stream = ?args.stream, rows = metadata.num_rows, "inspected raw object");
    println!("key: {}", args.key);
    println!("size_bytes: {}", bytes.len());
    println!("rows: {}", metadata.num_rows);
    println!("row_groups: {}", metadata.row_groups.len());
    println!("columns:");
    for field in &schema.fields {
        println!("  {}: {:?}", field.name, field.data_type);
    }
    Ok(ExitCode::SUCCESS)
}
