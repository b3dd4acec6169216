//! Operator tool: scan one image and print the result as JSON.
//!
//! `<image>` is a file path, an http(s) URL, or a `data:` URI. Configuration
//! comes from `PRECAST_SCAN_*` variables (or `.env`). Exit status is 0 on a
//! successful scan, 1 on a failed scan, 2 on bad usage or configuration.

use std::process::ExitCode;

use clap::{error::ErrorKind, Parser, Subcommand};
use precast_scan::{
    init_tracing, CancellationToken, ImageSource, ScanConfig, Scanner, ScheduleScanOptions,
};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "scan_image", version)]
#[command(about = "Scan a production schedule or product tag photo")]
#[command(
    after_help = "Environment:\n  PRECAST_SCAN_PROXY_URL     Trusted proxy endpoint (no API key needed)\n  PRECAST_SCAN_API_KEY       Bearer key for direct calls\n  PRECAST_SCAN_MODEL         Vision model name\n  PRECAST_SCAN_TIMEOUT_SECS  Per-request timeout"
)]
struct Cli {
    #[command(subcommand)]
    command: ScanCommand,
}

#[derive(Debug, PartialEq, Subcommand)]
enum ScanCommand {
    /// Scan a production schedule sheet
    Schedule {
        image: String,
        /// Expected pour date, used when the sheet's date is unreadable
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// Scan a product tag
    Tag { image: String },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize result: {e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                return ExitCode::SUCCESS;
            }
            _ => {
                eprint!("{err}");
                return ExitCode::from(2);
            }
        },
    };

    init_tracing();

    let scanner = match ScanConfig::from_env().and_then(Scanner::from_config) {
        Ok(scanner) => scanner,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    info!(
        "{} v{} using {}",
        precast_scan::config::APP_NAME,
        precast_scan::config::APP_VERSION,
        scanner.config().model
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let success = match cli.command {
        ScanCommand::Schedule {
            image,
            date,
            department,
        } => {
            let options = ScheduleScanOptions { date, department };
            let result = scanner
                .parse_schedule_image(&ImageSource::parse(&image), &options, &cancel)
                .await;
            print_json(&result);
            result.success
        }
        ScanCommand::Tag { image } => {
            let result = scanner
                .parse_product_tag(&ImageSource::parse(&image), &cancel)
                .await;
            print_json(&result);
            result.success
        }
    };

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
