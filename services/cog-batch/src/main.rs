//! Batch COG conversion and upload-staging CLI.
//!
//! Three subcommands cover the pipeline end to end:
//! - `work-list` prints a product's candidate input files
//! - `convert` fans the files across a worker pool, producing staged
//!   COG datasets under `<output-dir>/TO_UPLOAD/`
//! - `upload` watches `TO_UPLOAD/` and syncs each dataset to the
//!   destination recorded in its marker file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cog_pipeline::{
    generate_work_list, run_conversion, AwsCliSync, Converter, GdalCommandEngine, OutputLayout,
    ProductSet, TimeFilter, UploadWatcher, DEFAULT_WORKERS,
};

#[derive(Parser, Debug)]
#[command(name = "cog-batch")]
#[command(about = "Convert tiled NetCDF archives to COG datasets and stage them for upload")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a product's candidate input files, one per line
    WorkList {
        /// Product name
        #[arg(short, long)]
        product: String,

        /// Restrict to files from this year
        #[arg(short, long)]
        year: Option<i32>,

        /// Restrict to files from this month (requires --year)
        #[arg(short, long)]
        month: Option<u32>,

        /// Products configuration file (built-in defaults when omitted)
        #[arg(short, long, env = "COG_PRODUCTS_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Convert NetCDF files into staged COG datasets
    Convert {
        /// Product name
        #[arg(short, long)]
        product: String,

        /// Output root holding the WORKING/ and TO_UPLOAD/ areas
        #[arg(long)]
        output_dir: PathBuf,

        /// Products configuration file (built-in defaults when omitted)
        #[arg(short, long, env = "COG_PRODUCTS_CONFIG")]
        config: Option<PathBuf>,

        /// Maximum concurrent conversion workers
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        max_workers: usize,

        /// Restrict dataset slices to this year
        #[arg(long)]
        year: Option<i32>,

        /// Restrict dataset slices to this month (requires --year)
        #[arg(long)]
        month: Option<u32>,

        /// Input NetCDF files
        #[arg(required = true)]
        filenames: Vec<PathBuf>,
    },

    /// Watch TO_UPLOAD/ and sync staged datasets to their destinations
    Upload {
        /// Output root holding the TO_UPLOAD/ area
        #[arg(long)]
        output_dir: PathBuf,

        /// Retain uploaded datasets under COMPLETE/ instead of deleting them
        #[arg(short, long)]
        retain_datasets: bool,

        /// Seconds between poll cycles
        #[arg(long, default_value = "1")]
        poll_interval_secs: u64,

        /// Idle seconds after the last processed dataset before exiting
        #[arg(long, default_value = "300")]
        idle_timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so work-list output stays pipeable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::WorkList {
            product,
            year,
            month,
            config,
        } => {
            let products = ProductSet::load_or_builtin(config.as_deref())?;
            let policy = products.get(&product)?;
            let filter = build_filter(year, month)?;

            for file in generate_work_list(policy, filter.as_ref())? {
                println!("{}", file.display());
            }
        }

        Command::Convert {
            product,
            output_dir,
            config,
            max_workers,
            year,
            month,
            filenames,
        } => {
            let products = ProductSet::load_or_builtin(config.as_deref())?;
            let policy = products.get(&product)?.clone();
            let filter = build_filter(year, month)?;

            info!(
                product = %product,
                files = filenames.len(),
                max_workers,
                "Starting conversion batch"
            );

            let layout = OutputLayout::new(&output_dir);
            let converter = Converter::new(Arc::new(GdalCommandEngine::new()), policy);
            let report =
                run_conversion(&filenames, &converter, &layout, max_workers, filter.as_ref())
                    .await?;

            for (file, error) in &report.failed {
                warn!(file = %file.display(), error = %error, "File failed; resubmit by name to retry");
            }
            info!(
                converted = report.converted_files,
                staged = report.staged_datasets,
                failed = report.failed.len(),
                "Conversion batch finished"
            );
        }

        Command::Upload {
            output_dir,
            retain_datasets,
            poll_interval_secs,
            idle_timeout_secs,
        } => {
            info!(
                output_dir = %output_dir.display(),
                retain_datasets,
                "Starting upload watcher"
            );

            let layout = OutputLayout::new(&output_dir);
            let watcher = UploadWatcher::new(Arc::new(AwsCliSync::new()), layout, retain_datasets)
                .with_intervals(
                    Duration::from_secs(poll_interval_secs),
                    Duration::from_secs(idle_timeout_secs),
                );
            watcher.run().await?;
        }
    }

    Ok(())
}

fn build_filter(year: Option<i32>, month: Option<u32>) -> Result<Option<TimeFilter>> {
    match (year, month) {
        (Some(year), month) => Ok(Some(TimeFilter { year, month })),
        (None, Some(_)) => bail!("--month requires --year"),
        (None, None) => Ok(None),
    }
}
