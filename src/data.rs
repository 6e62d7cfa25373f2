use crate::bid_coefficients::PublisherBid;
use crate::bucketing::ReactivationReport;
use crate::error::Error;
use crate::event::{Event, EventType};
use crate::publisher_performance::PublisherPerformance;
use crate::reactivation::Reactivation;
use chrono::DateTime;
use datafusion::arrow::array::{
    Array, ArrayRef, AsArray, Float64Builder, Int64Builder, RecordBatch, StringArray,
    StringBuilder, UInt64Builder,
};
use datafusion::arrow::csv::reader::Format;
use datafusion::arrow::datatypes::{
    DataType, Field, Float64Type, Int64Type, Schema, TimeUnit, TimestampMicrosecondType,
};
use datafusion::common::ScalarValue;
use datafusion::config::CsvOptions;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::logical_expr::{cast, try_cast, Expr};
use datafusion::prelude::{col, lit, DataFrame, SessionContext};
use log::debug;
use std::io::Read;
use std::sync::Arc;

pub const USER_ID: &str = "external_user_id";
pub const EVENT_TYPE: &str = "event_type";
pub const EVENT_DATE: &str = "event_date";
pub const PUBLISHER_ID: &str = "publisher_id";
pub const AMOUNT: &str = "deposit_amount";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, None)
}

/// Schema of a CSV file that keeps the header names and reads every column as
/// nullable Utf8. Only the header row is consumed.
pub fn utf8_csv_schema<R: Read>(reader: R) -> Result<Schema, Error> {
    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(reader, Some(0))?;

    Ok(Schema::new(
        header
            .fields()
            .iter()
            .map(|field| Field::new(field.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().has_column_with_unqualified_name(name)
}

fn optional_column(df: &DataFrame, name: &str, data_type: DataType, null: ScalarValue) -> Expr {
    if has_column(df, name) {
        try_cast(col(name), data_type).alias(name)
    } else {
        lit(null).alias(name)
    }
}

///
/// Normalizes a raw `user_events` frame to the columns and types the analysis needs.
///
/// Rows whose user or timestamp cannot be read are dropped, the same way an
/// unparseable `event_date` is dropped on import.
///
/// # Arguments
/// * `df` - [`DataFrame`] read from an event export
///
/// # Returns
/// A Result containing either the normalized [`DataFrame`] or an [`Error`]
pub fn normalize_events(df: DataFrame) -> Result<DataFrame, Error> {
    for required in [USER_ID, EVENT_TYPE, EVENT_DATE] {
        if !has_column(&df, required) {
            return Err(Error::NoData {
                message: format!("Event data has no '{}' column", required),
            });
        }
    }

    let publisher = optional_column(&df, PUBLISHER_ID, DataType::Int64, ScalarValue::Int64(None));
    let amount = optional_column(&df, AMOUNT, DataType::Float64, ScalarValue::Float64(None));

    let df = df
        .select(vec![
            cast(col(USER_ID), DataType::Utf8).alias(USER_ID),
            cast(col(EVENT_TYPE), DataType::Utf8).alias(EVENT_TYPE),
            try_cast(col(EVENT_DATE), timestamp_type()).alias(EVENT_DATE),
            publisher,
            amount,
        ])?
        .filter(
            col(USER_ID)
                .is_not_null()
                .and(col(USER_ID).not_eq(lit("")))
                .and(col(EVENT_TYPE).is_not_null())
                .and(col(EVENT_DATE).is_not_null()),
        )?;

    Ok(df)
}

/// Keeps only events of one type. Expects a frame from [`normalize_events`].
pub fn filter_event_type(df: DataFrame, event_type: &EventType) -> Result<DataFrame, Error> {
    Ok(df.filter(col(EVENT_TYPE).eq(lit(event_type.as_str())))?)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, Error> {
    batch.column_by_name(name).ok_or_else(|| Error::NoData {
        message: format!("Column '{}' is missing", name),
    })
}

fn unexpected(name: &str, array: &ArrayRef) -> Error {
    Error::UnexpectedColumnType {
        column: name.to_string(),
        data_type: array.data_type().to_string(),
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, Error> {
    let array = column(batch, name)?;
    array
        .as_string_opt::<i32>()
        .ok_or_else(|| unexpected(name, array))
}

/// Materializes a normalized event frame.
///
/// # Returns
/// A Result containing the [`Event`]s in frame order or an [`Error`]
pub async fn events_from_df(df: DataFrame) -> Result<Vec<Event>, Error> {
    let batches = df.collect().await?;
    let mut events = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());

    for batch in &batches {
        let users = string_column(batch, USER_ID)?;
        let types = string_column(batch, EVENT_TYPE)?;
        let dates_array = column(batch, EVENT_DATE)?;
        let dates = dates_array
            .as_primitive_opt::<TimestampMicrosecondType>()
            .ok_or_else(|| unexpected(EVENT_DATE, dates_array))?;
        let publishers_array = column(batch, PUBLISHER_ID)?;
        let publishers = publishers_array
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(|| unexpected(PUBLISHER_ID, publishers_array))?;
        let amounts_array = column(batch, AMOUNT)?;
        let amounts = amounts_array
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| unexpected(AMOUNT, amounts_array))?;

        for i in 0..batch.num_rows() {
            if users.is_null(i) || types.is_null(i) || dates.is_null(i) {
                continue;
            }
            let Some(timestamp) = DateTime::from_timestamp_micros(dates.value(i)) else {
                debug!("skipping event with out of range timestamp {}", dates.value(i));
                continue;
            };

            events.push(Event {
                user_id: users.value(i).to_string(),
                event_type: EventType::from(types.value(i)),
                timestamp: timestamp.naive_utc(),
                publisher_id: publishers.is_valid(i).then(|| publishers.value(i)),
                amount: amounts.is_valid(i).then(|| amounts.value(i)),
            });
        }
    }

    Ok(events)
}

/// Collects the non-null values of one column as strings.
pub async fn string_values(df: DataFrame, column_name: &str) -> Result<Vec<String>, Error> {
    let batches = df
        .select(vec![cast(col(column_name), DataType::Utf8).alias("value")])?
        .collect()
        .await?;

    let mut values = Vec::new();
    for batch in &batches {
        let array = string_column(batch, "value")?;
        values.extend(
            (0..array.len())
                .filter(|i| array.is_valid(*i))
                .map(|i| array.value(i).trim().to_string())
                .filter(|v| !v.is_empty()),
        );
    }

    Ok(values)
}

pub fn detail_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("anchor_timestamp", DataType::Utf8, false),
        Field::new("prior_timestamp", DataType::Utf8, false),
        Field::new("gap_days", DataType::Int64, false),
        Field::new("band_label", DataType::Utf8, false),
    ]))
}

pub fn summary_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("band_label", DataType::Utf8, false),
        Field::new("count", DataType::UInt64, false),
        Field::new("avg_gap_days", DataType::Float64, false),
        Field::new("percentage", DataType::Float64, false),
    ]))
}

/// Converts reactivation records to a [`DataFrame`] with one row per reactivation.
pub fn reactivations_to_df(
    records: &[Reactivation],
    ctx: &SessionContext,
) -> Result<DataFrame, Error> {
    let mut user_ids = StringBuilder::new();
    let mut anchors = StringBuilder::new();
    let mut priors = StringBuilder::new();
    let mut gaps = Int64Builder::with_capacity(records.len());
    let mut bands = StringBuilder::new();

    for record in records {
        user_ids.append_value(&record.user_id);
        anchors.append_value(record.anchor.format(TIMESTAMP_FORMAT).to_string());
        priors.append_value(record.prior.format(TIMESTAMP_FORMAT).to_string());
        gaps.append_value(record.gap_days);
        bands.append_value(record.band().label());
    }

    let batch = RecordBatch::try_new(
        detail_schema(),
        vec![
            Arc::new(user_ids.finish()),
            Arc::new(anchors.finish()),
            Arc::new(priors.finish()),
            Arc::new(gaps.finish()),
            Arc::new(bands.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

/// Converts a report to a [`DataFrame`]: the bands in report order followed by the total row.
pub fn summary_to_df(report: &ReactivationReport, ctx: &SessionContext) -> Result<DataFrame, Error> {
    let rows = report.bands.iter().chain(std::iter::once(&report.total));

    let mut labels = StringBuilder::new();
    let mut counts = UInt64Builder::new();
    let mut averages = Float64Builder::new();
    let mut percentages = Float64Builder::new();

    for row in rows {
        labels.append_value(&row.label);
        counts.append_value(row.count as u64);
        averages.append_value(row.avg_gap_days);
        percentages.append_value(row.percentage);
    }

    let batch = RecordBatch::try_new(
        summary_schema(),
        vec![
            Arc::new(labels.finish()),
            Arc::new(counts.finish()),
            Arc::new(averages.finish()),
            Arc::new(percentages.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

pub fn publisher_bids_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("publisher_id", DataType::Int64, false),
        Field::new("publisher_name", DataType::Utf8, true),
        Field::new("format", DataType::Utf8, false),
        Field::new("total_deps", DataType::UInt64, false),
        Field::new("spend", DataType::Float64, false),
        Field::new("current_cpa", DataType::Float64, false),
        Field::new("target_cpa_format", DataType::Float64, false),
        Field::new("coefficient", DataType::Float64, false),
        Field::new("change_pct", DataType::Float64, false),
        Field::new("action", DataType::Utf8, false),
    ]))
}

pub fn publisher_bids_to_df(bids: &[PublisherBid], ctx: &SessionContext) -> Result<DataFrame, Error> {
    let mut ids = Int64Builder::with_capacity(bids.len());
    let mut names = StringBuilder::new();
    let mut formats = StringBuilder::new();
    let mut deposits = UInt64Builder::with_capacity(bids.len());
    let mut spend = Float64Builder::with_capacity(bids.len());
    let mut current = Float64Builder::with_capacity(bids.len());
    let mut target = Float64Builder::with_capacity(bids.len());
    let mut coefficients = Float64Builder::with_capacity(bids.len());
    let mut changes = Float64Builder::with_capacity(bids.len());
    let mut actions = StringBuilder::new();

    for bid in bids {
        ids.append_value(bid.publisher_id);
        names.append_option(bid.publisher_name.as_deref());
        formats.append_value(bid.format.as_str());
        deposits.append_value(bid.total_deposits);
        spend.append_value(bid.spend);
        current.append_value(bid.current_cpa);
        target.append_value(bid.target_cpa);
        coefficients.append_value(bid.coefficient);
        changes.append_value(bid.change_pct);
        actions.append_value(bid.action.label());
    }

    let batch = RecordBatch::try_new(
        publisher_bids_schema(),
        vec![
            Arc::new(ids.finish()),
            Arc::new(names.finish()),
            Arc::new(formats.finish()),
            Arc::new(deposits.finish()),
            Arc::new(spend.finish()),
            Arc::new(current.finish()),
            Arc::new(target.finish()),
            Arc::new(coefficients.finish()),
            Arc::new(changes.finish()),
            Arc::new(actions.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

pub fn publisher_performance_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("publisher_id", DataType::Int64, false),
        Field::new("publisher_name", DataType::Utf8, true),
        Field::new("format", DataType::Utf8, false),
        Field::new("total_deps", DataType::UInt64, false),
        Field::new("ftd_db", DataType::UInt64, false),
        Field::new("rd_db", DataType::UInt64, false),
        Field::new("spend", DataType::Float64, false),
        Field::new("ftd_cpa", DataType::Float64, false),
        Field::new("rd_cpa", DataType::Float64, false),
        Field::new("total_cpa", DataType::Float64, false),
        Field::new("rd_rate", DataType::Float64, false),
    ]))
}

pub fn publisher_performance_to_df(
    publishers: &[PublisherPerformance],
    ctx: &SessionContext,
) -> Result<DataFrame, Error> {
    let capacity = publishers.len();
    let mut ids = Int64Builder::with_capacity(capacity);
    let mut names = StringBuilder::new();
    let mut formats = StringBuilder::new();
    let mut totals = UInt64Builder::with_capacity(capacity);
    let mut ftds = UInt64Builder::with_capacity(capacity);
    let mut rds = UInt64Builder::with_capacity(capacity);
    let mut spend = Float64Builder::with_capacity(capacity);
    let mut ftd_cpa = Float64Builder::with_capacity(capacity);
    let mut rd_cpa = Float64Builder::with_capacity(capacity);
    let mut total_cpa = Float64Builder::with_capacity(capacity);
    let mut rd_rate = Float64Builder::with_capacity(capacity);

    for p in publishers {
        ids.append_value(p.publisher_id);
        names.append_option(p.publisher_name.as_deref());
        formats.append_value(p.format.as_str());
        totals.append_value(p.total_deps);
        ftds.append_value(p.ftd);
        rds.append_value(p.rd);
        spend.append_value(p.spend);
        ftd_cpa.append_value(p.ftd_cpa);
        rd_cpa.append_value(p.rd_cpa);
        total_cpa.append_value(p.total_cpa);
        rd_rate.append_value(p.rd_rate);
    }

    let batch = RecordBatch::try_new(
        publisher_performance_schema(),
        vec![
            Arc::new(ids.finish()),
            Arc::new(names.finish()),
            Arc::new(formats.finish()),
            Arc::new(totals.finish()),
            Arc::new(ftds.finish()),
            Arc::new(rds.finish()),
            Arc::new(spend.finish()),
            Arc::new(ftd_cpa.finish()),
            Arc::new(rd_cpa.finish()),
            Arc::new(total_cpa.finish()),
            Arc::new(rd_rate.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

/// Writes the frame to a single CSV file with a header row.
pub async fn save_csv(df: DataFrame, path: &str) -> Result<(), Error> {
    df.write_csv(
        path,
        DataFrameWriteOptions::new().with_single_file_output(true),
        Some(CsvOptions::default().with_has_header(true)),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketing::summarize;
    use crate::event::{ts, window};
    use crate::reactivation::ReactivationSet;
    use datafusion::arrow::array::{Int64Array, TimestampSecondArray};
    use tempfile::TempDir;

    fn raw_events_df(ctx: &SessionContext) -> Result<DataFrame, Error> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(USER_ID, DataType::Int64, true),
            Field::new(EVENT_TYPE, DataType::Utf8, true),
            Field::new(EVENT_DATE, DataType::Timestamp(TimeUnit::Second, None), true),
        ]));

        let users = Int64Array::from(vec![Some(1001), Some(1002), None, Some(1001)]);
        let types = StringArray::from(vec![Some("deposit"), Some("click"), Some("deposit"), Some("deposit")]);
        let dates = TimestampSecondArray::from(vec![
            Some(1_735_689_600), // 2025-01-01 00:00:00
            Some(1_735_776_000),
            Some(1_735_776_000),
            None,
        ]);

        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(users), Arc::new(types), Arc::new(dates)],
        )?;
        Ok(ctx.read_batch(batch)?)
    }

    fn sample_records() -> Vec<Reactivation> {
        vec![
            Reactivation {
                user_id: "U".to_string(),
                anchor: ts("2025-01-10 00:00:00"),
                prior: ts("2025-01-01 00:00:00"),
                gap_days: 9,
            },
            Reactivation {
                user_id: "Y".to_string(),
                anchor: ts("2025-01-11 12:30:00"),
                prior: ts("2024-09-01 08:00:00"),
                gap_days: 132,
            },
        ]
    }

    #[test]
    fn test_utf8_csv_schema_reads_header_only() -> Result<(), Error> {
        let schema = utf8_csv_schema("external_user_id,deposit_amount\n1001,50\n".as_bytes())?;

        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec![USER_ID, AMOUNT]);
        assert!(schema
            .fields()
            .iter()
            .all(|f| f.data_type() == &DataType::Utf8 && f.is_nullable()));
        Ok(())
    }

    #[tokio::test]
    async fn test_normalize_events_casts_and_drops_incomplete_rows() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = normalize_events(raw_events_df(&ctx)?)?;

        let schema = df.schema();
        assert_eq!(schema.fields().len(), 5);
        assert_eq!(schema.field(0).name(), USER_ID);
        assert_eq!(schema.field(2).data_type(), &timestamp_type());
        assert_eq!(schema.field(3).name(), PUBLISHER_ID);

        let events = events_from_df(df).await?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, "1001");
        assert_eq!(events[0].event_type, EventType::Deposit);
        assert_eq!(events[0].timestamp, ts("2025-01-01 00:00:00"));
        assert_eq!(events[0].publisher_id, None);
        assert_eq!(events[1].event_type, EventType::Click);
        Ok(())
    }

    #[tokio::test]
    async fn test_filter_event_type() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = filter_event_type(normalize_events(raw_events_df(&ctx)?)?, &EventType::Click)?;

        let events = events_from_df(df).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "1002");
        Ok(())
    }

    #[tokio::test]
    async fn test_normalize_requires_event_columns() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = raw_events_df(&ctx)?.drop_columns(&[EVENT_DATE])?;

        assert!(matches!(
            normalize_events(df).unwrap_err(),
            Error::NoData { message } if message.contains(EVENT_DATE)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reactivations_to_df() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let df = reactivations_to_df(&sample_records(), &ctx)?;

        let batches = df.collect().await?;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 2);

        let bands = string_column(&batches[0], "band_label")?;
        assert_eq!(bands.value(0), "7-14 days");
        assert_eq!(bands.value(1), "90+ days");
        let anchors = string_column(&batches[0], "anchor_timestamp")?;
        assert_eq!(anchors.value(1), "2025-01-11 12:30:00");
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_to_df_keeps_band_order_and_total() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let set = ReactivationSet {
            window: window("2025-01-08", "2025-01-12"),
            records: sample_records(),
            depositors: 3,
            new_count: 1,
            below_floor_count: 0,
            users_requested: None,
        };
        let df = summary_to_df(&summarize(&set), &ctx)?;

        let batches = df.collect().await?;
        let labels = string_column(&batches[0], "band_label")?;
        let collected: Vec<_> = (0..labels.len()).map(|i| labels.value(i)).collect();
        assert_eq!(
            collected,
            vec!["0-7 days", "7-14 days", "14-30 days", "30-90 days", "90+ days", "Total"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_save_csv_writes_header_and_rows() -> Result<(), Error> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("detail.csv");
        let path = path.to_str().unwrap();

        let ctx = SessionContext::new();
        save_csv(reactivations_to_df(&sample_records(), &ctx)?, path).await?;

        let written = std::fs::read_to_string(path)?;
        let mut lines = written.lines();
        assert_eq!(
            lines.next(),
            Some("user_id,anchor_timestamp,prior_timestamp,gap_days,band_label")
        );
        assert_eq!(
            lines.next(),
            Some("U,2025-01-10 00:00:00,2025-01-01 00:00:00,9,7-14 days")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_string_values_skips_blanks() -> Result<(), Error> {
        let ctx = SessionContext::new();
        let schema = Arc::new(Schema::new(vec![Field::new("user_id", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec![Some(" a "), None, Some(""), Some("b")]))],
        )?;

        let values = string_values(ctx.read_batch(batch)?, "user_id").await?;
        assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_publisher_performance_to_df() -> Result<(), Error> {
        use crate::bid_coefficients::SpendRow;
        use crate::event_source::PublisherSplit;

        let split = PublisherSplit {
            publisher_id: 7,
            total: 4,
            first: 1,
            repeat: 3,
        };
        let row = SpendRow::new("(7) Pop main", 4.0, 120.0).unwrap();
        let publishers = vec![
            PublisherPerformance::new(&split, Some(&row)),
            PublisherPerformance::new(&PublisherSplit { publisher_id: 8, ..split }, None),
        ];

        let ctx = SessionContext::new();
        let batches = publisher_performance_to_df(&publishers, &ctx)?
            .collect()
            .await?;
        let batch = &batches[0];

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(4).name(), "ftd_db");
        let names = string_column(batch, "publisher_name")?;
        assert_eq!(names.value(0), "(7) Pop main");
        assert!(names.is_null(1));
        let rd_cpa = column(batch, "rd_cpa")?.as_primitive::<Float64Type>();
        assert_eq!(rd_cpa.value(0), 40.0);
        let rd_rate = column(batch, "rd_rate")?.as_primitive::<Float64Type>();
        assert_eq!(rd_rate.value(0), 75.0);
        Ok(())
    }
}
