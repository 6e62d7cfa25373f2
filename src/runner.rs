use crate::bid_coefficients::{build_bid_report, BidOptions, BidReport};
use crate::bucketing::{summarize, ReactivationReport};
use crate::config::{Config, SourceKind};
use crate::data;
use crate::error::Error;
use crate::event::{EventType, ReactivationWindow};
use crate::event_loader::{load_user_list, EventLoader, FileEventLoader};
use crate::event_source::{EventHistory, EventSource};
use crate::postgres_source::PostgresEventSource;
use crate::publisher_performance::{
    build_performance_report, PerformanceOptions, PerformanceReport,
};
use crate::reactivation::{
    calculate_reactivations, reactivations_from_history, ReactivationOptions, ReactivationSet,
};
use crate::spend_loader::{CsvSpendLoader, SpendLoader};
use crate::sqlite_source::SqliteEventSource;
use datafusion::prelude::SessionContext;
use log::{info, warn};
use std::fs;
use std::path::Path;

const BID_COEFFICIENTS_FILE: &str = "publishers_bid_coefficients.csv";
const PERFORMANCE_FILE: &str = "publishers_performance.csv";

pub struct ReactivationRequest {
    /// Comma-separated ids or a CSV file of users to restrict the run to.
    pub users: Option<String>,
    pub min_gap_days: i64,
    pub output_prefix: String,
    pub skip_detail: bool,
    pub json: bool,
}

pub struct BidRequest {
    pub spend_file: String,
    pub skip_lines: usize,
    pub options: BidOptions,
}

pub struct PerformanceRequest {
    pub spend_file: String,
    pub skip_lines: usize,
    pub options: PerformanceOptions,
}

/// The event history a run works on.
pub enum Events {
    /// A file export read into memory once.
    Snapshot(EventHistory),
    /// A database queried as the run goes.
    Database(Box<dyn EventSource>),
}

impl Events {
    pub fn source(&self) -> &dyn EventSource {
        match self {
            Events::Snapshot(history) => history,
            Events::Database(source) => source.as_ref(),
        }
    }

    /// A snapshot is searched in memory without going through the async lookups.
    pub async fn reactivations(
        &self,
        window: &ReactivationWindow,
        options: &ReactivationOptions,
    ) -> Result<ReactivationSet, Error> {
        match self {
            Events::Snapshot(history) => Ok(reactivations_from_history(history, window, options)),
            Events::Database(source) => {
                calculate_reactivations(source.as_ref(), window, options).await
            }
        }
    }
}

fn output_path(output_dir: &str, file_name: &str) -> String {
    Path::new(output_dir)
        .join(file_name)
        .to_string_lossy()
        .into_owned()
}

/// Builds the configured event source. A file export is read once into memory,
/// keeping only events of `event_type`.
async fn events(
    config: &Config,
    ctx: &SessionContext,
    event_type: &EventType,
) -> Result<Events, Error> {
    match config.source {
        SourceKind::File => {
            let loader = FileEventLoader::new(config);
            let df = data::filter_event_type(loader.load(ctx).await?, event_type)?;
            let history = EventHistory::from_events(data::events_from_df(df).await?);
            if history.is_empty() {
                warn!("no {} events in {}", event_type, config.events_path);
            }
            info!(
                "loaded {} {} events from {}",
                history.len(),
                event_type,
                config.events_path
            );
            Ok(Events::Snapshot(history))
        }
        SourceKind::Postgres => Ok(Events::Database(Box::new(
            PostgresEventSource::connect(&config.postgres_url()).await?,
        ))),
        SourceKind::Sqlite => Ok(Events::Database(Box::new(
            SqliteEventSource::connect(&config.db_path).await?,
        ))),
    }
}

/// Computes the reactivation report for the window and writes the summary
/// (and detail) CSV files. Files are only written once the whole computation
/// succeeded.
pub async fn reactivations_with_events(
    events: &Events,
    ctx: &SessionContext,
    window: &ReactivationWindow,
    request: &ReactivationRequest,
    output_dir: &str,
) -> Result<ReactivationReport, Error> {
    let mut options = ReactivationOptions {
        min_gap_days: request.min_gap_days,
        ..Default::default()
    };
    if let Some(users) = &request.users {
        let user_ids = load_user_list(ctx, users).await?;
        info!("restricting the run to {} listed users", user_ids.len());
        options = options.with_user_list(user_ids);
    }

    let set = events.reactivations(window, &options).await?;
    let report = summarize(&set);
    let summary_df = data::summary_to_df(&report, ctx)?;
    let detail_df = if request.skip_detail || set.records.is_empty() {
        None
    } else {
        Some(data::reactivations_to_df(&set.records, ctx)?)
    };

    fs::create_dir_all(output_dir)?;

    let summary_path = output_path(output_dir, &format!("{}_summary.csv", request.output_prefix));
    data::save_csv(summary_df, &summary_path).await?;
    info!("summary written to {}", summary_path);

    if let Some(detail_df) = detail_df {
        let detail_path =
            output_path(output_dir, &format!("{}_detail.csv", request.output_prefix));
        data::save_csv(detail_df, &detail_path).await?;
        info!("{} reactivations written to {}", set.records.len(), detail_path);
    }

    Ok(report)
}

pub async fn run_reactivations(
    config: &Config,
    window: &ReactivationWindow,
    request: &ReactivationRequest,
) -> Result<(), Error> {
    let ctx = SessionContext::new();
    let events = events(config, &ctx, &EventType::Deposit).await?;

    let report =
        reactivations_with_events(&events, &ctx, window, request, &config.output_dir).await?;

    if request.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(())
}

/// Joins deposit counts per publisher with the spend export and writes the
/// merged table.
pub async fn bid_coefficients_with_source(
    source: &dyn EventSource,
    ctx: &SessionContext,
    window: &ReactivationWindow,
    request: &BidRequest,
    output_dir: &str,
) -> Result<BidReport, Error> {
    let deposit_counts = source
        .count_by_publisher(&EventType::Deposit, window)
        .await?;
    info!(
        "found deposits for {} publishers in {}",
        deposit_counts.len(),
        window
    );

    let spend = CsvSpendLoader::new(&request.spend_file, request.skip_lines)
        .load(ctx)
        .await?;

    let report = build_bid_report(&deposit_counts, &spend, &request.options);
    let df = data::publisher_bids_to_df(&report.publishers, ctx)?;

    fs::create_dir_all(output_dir)?;
    let path = output_path(output_dir, BID_COEFFICIENTS_FILE);
    data::save_csv(df, &path).await?;
    info!("{} publishers written to {}", report.publishers.len(), path);

    Ok(report)
}

pub async fn run_bid_coefficients(
    config: &Config,
    window: &ReactivationWindow,
    request: &BidRequest,
) -> Result<(), Error> {
    let ctx = SessionContext::new();
    let events = events(config, &ctx, &EventType::Deposit).await?;

    let report =
        bid_coefficients_with_source(events.source(), &ctx, window, request, &config.output_dir)
            .await?;
    print!("{}", report);

    Ok(())
}

/// Splits each publisher's deposits into first and repeat deposits, joins
/// them with the spend export and writes the merged table.
pub async fn publisher_performance_with_source(
    source: &dyn EventSource,
    ctx: &SessionContext,
    window: &ReactivationWindow,
    request: &PerformanceRequest,
    output_dir: &str,
) -> Result<PerformanceReport, Error> {
    let splits = source
        .first_and_repeat_by_publisher(&EventType::Deposit, window)
        .await?;
    info!(
        "split deposits of {} publishers in {}",
        splits.len(),
        window
    );

    let spend = CsvSpendLoader::new(&request.spend_file, request.skip_lines)
        .load(ctx)
        .await?;

    let report = build_performance_report(&splits, &spend, &request.options);
    let df = data::publisher_performance_to_df(&report.publishers, ctx)?;

    fs::create_dir_all(output_dir)?;
    let path = output_path(output_dir, PERFORMANCE_FILE);
    data::save_csv(df, &path).await?;
    info!("{} publishers written to {}", report.publishers.len(), path);

    Ok(report)
}

pub async fn run_publisher_performance(
    config: &Config,
    window: &ReactivationWindow,
    request: &PerformanceRequest,
) -> Result<(), Error> {
    let ctx = SessionContext::new();
    let events = events(config, &ctx, &EventType::Deposit).await?;

    let report = publisher_performance_with_source(
        events.source(),
        &ctx,
        window,
        request,
        &config.output_dir,
    )
    .await?;
    print!("{}", report);

    Ok(())
}
