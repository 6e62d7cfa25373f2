mod bid_coefficients;
mod bucketing;
mod config;
mod data;
mod error;
mod event;
mod event_loader;
mod event_source;
mod postgres_source;
mod publisher_performance;
mod reactivation;
mod report;
mod runner;
mod spend_loader;
mod sqlite_source;

use bid_coefficients::{BidOptions, DEFAULT_DISCOUNT, DEFAULT_MIN_SPEND};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use event::ReactivationWindow;
use log::error;
use publisher_performance::PerformanceOptions;
use runner::{BidRequest, PerformanceRequest, ReactivationRequest};

#[derive(Parser)]
#[command(about = "Deposit reactivation and publisher bid analytics over user_events")]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Buckets the inactivity gap of users whose first deposit in the window follows an earlier deposit
    Reactivations {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,

        /// Comma-separated user ids, or a CSV file with a user_id column
        #[arg(long)]
        users: Option<String>,

        /// Gaps shorter than this many days are not counted as reactivations
        #[arg(long, default_value_t = 0)]
        min_gap_days: i64,

        #[arg(long, default_value = "reactivations")]
        output_prefix: String,

        /// Only write the summary CSV
        #[arg(long)]
        skip_detail: bool,

        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Suggests per-publisher bid coefficients from a spend export
    BidCoefficients {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,

        #[arg(long)]
        spend_file: String,

        /// Title lines above the header row of the spend export
        #[arg(long, default_value_t = 1)]
        skip_lines: usize,

        #[arg(long, default_value_t = DEFAULT_MIN_SPEND)]
        min_spend: f64,

        #[arg(long, default_value_t = DEFAULT_DISCOUNT)]
        discount: f64,
    },
    /// Splits each publisher's deposits into first-time and repeat deposits and prices them with a spend export
    Publishers {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,

        #[arg(long)]
        spend_file: String,

        /// Title lines above the header row of the spend export
        #[arg(long, default_value_t = 1)]
        skip_lines: usize,

        #[arg(long, default_value_t = publisher_performance::DEFAULT_MIN_SPEND)]
        min_spend: f64,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split('-')
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => Ok(NaiveDate::from_ymd_opt(
            year as i32,
            month as u32,
            day as u32,
        )
        .ok_or(error_message)?),
        _ => Err(error_message.to_string()),
    }
}

async fn run(args: Args) -> Result<(), Error> {
    match args.command {
        Command::Reactivations {
            start,
            end,
            users,
            min_gap_days,
            output_prefix,
            skip_detail,
            json,
        } => {
            let window = ReactivationWindow::new(start, end)?;
            let request = ReactivationRequest {
                users,
                min_gap_days,
                output_prefix,
                skip_detail,
                json,
            };
            runner::run_reactivations(&args.config, &window, &request).await
        }
        Command::BidCoefficients {
            start,
            end,
            spend_file,
            skip_lines,
            min_spend,
            discount,
        } => {
            let window = ReactivationWindow::new(start, end)?;
            let request = BidRequest {
                spend_file,
                skip_lines,
                options: BidOptions {
                    discount,
                    min_spend,
                },
            };
            runner::run_bid_coefficients(&args.config, &window, &request).await
        }
        Command::Publishers {
            start,
            end,
            spend_file,
            skip_lines,
            min_spend,
        } => {
            let window = ReactivationWindow::new(start, end)?;
            let request = PerformanceRequest {
                spend_file,
                skip_lines,
                options: PerformanceOptions { min_spend },
            };
            runner::run_publisher_performance(&args.config, &window, &request).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    if let Err(err) = run(args).await {
        error!("failed to run analysis: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
