use crate::bid_coefficients::SpendRow;
use crate::data::utf8_csv_schema;
use crate::error::Error;
use datafusion::arrow::array::{Array, AsArray};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::csv::reader::Format;
use datafusion::arrow::csv::ReaderBuilder;
use datafusion::arrow::datatypes::{DataType, Float64Type};
use datafusion::logical_expr::{cast, try_cast};
use datafusion::prelude::{ident, SessionContext};
use log::{info, warn};
use std::fs;
use std::io::Cursor;
use std::sync::Arc;

const PUBLISHER: &str = "Publisher";
const DEPOSIT: &str = "Deposit";
const SPEND: &str = "Spend";

fn or_zero(valid: bool, value: f64) -> f64 {
    if valid {
        value
    } else {
        0.0
    }
}

#[async_trait::async_trait]
pub trait SpendLoader: Send + Sync + 'static {
    /// Loads per-publisher spend.
    ///
    /// # Arguments
    /// * `ctx` - The session context for the DataFrame operations.
    ///
    /// # Returns
    /// A Result containing either the spend rows that carry a publisher id or an Error.
    async fn load(&self, ctx: &SessionContext) -> Result<Vec<SpendRow>, Error>;
}

/// Reads an ad-network spend export. Exports start with title lines above the
/// header row, `skip_lines` of them are dropped.
#[derive(Clone)]
pub struct CsvSpendLoader {
    file_path: String,
    skip_lines: usize,
}

impl CsvSpendLoader {
    pub fn new(file_path: &str, skip_lines: usize) -> Self {
        CsvSpendLoader {
            file_path: file_path.to_string(),
            skip_lines,
        }
    }
}

#[async_trait::async_trait]
impl SpendLoader for CsvSpendLoader {
    async fn load(&self, ctx: &SessionContext) -> Result<Vec<SpendRow>, Error> {
        if fs::metadata(&self.file_path).is_err() {
            return Err(Error::SpendFileNotFound {
                path: self.file_path.clone(),
            });
        }

        let contents = fs::read_to_string(&self.file_path)?;
        let body = contents
            .lines()
            .skip(self.skip_lines)
            .collect::<Vec<_>>()
            .join("\n");

        let schema = Arc::new(utf8_csv_schema(Cursor::new(body.as_bytes()))?);

        for required in [PUBLISHER, DEPOSIT, SPEND] {
            if schema.column_with_name(required).is_none() {
                return Err(Error::MissingSpendColumn {
                    path: self.file_path.clone(),
                    column: required.to_string(),
                });
            }
        }

        let batches = ReaderBuilder::new(schema.clone())
            .with_format(Format::default().with_header(true))
            .build(Cursor::new(body.as_bytes()))?
            .collect::<Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;

        let df = ctx
            .read_batch(batch)?
            .select(vec![
                cast(ident(PUBLISHER), DataType::Utf8).alias("publisher"),
                try_cast(ident(DEPOSIT), DataType::Float64).alias("deposits"),
                try_cast(ident(SPEND), DataType::Float64).alias("spend"),
            ])?;

        let mut rows = Vec::new();
        let mut skipped = 0;
        for batch in df.collect().await? {
            let names = batch.column(0).as_string::<i32>();
            let deposits = batch.column(1).as_primitive::<Float64Type>();
            let spend = batch.column(2).as_primitive::<Float64Type>();

            for i in 0..batch.num_rows() {
                let row = names
                    .is_valid(i)
                    .then(|| {
                        SpendRow::new(
                            names.value(i),
                            or_zero(deposits.is_valid(i), deposits.value(i)),
                            or_zero(spend.is_valid(i), spend.value(i)),
                        )
                    })
                    .flatten();
                match row {
                    Some(row) => rows.push(row),
                    None => skipped += 1,
                }
            }
        }

        if skipped > 0 {
            warn!("skipped {} spend rows without a publisher id", skipped);
        }
        info!("loaded spend for {} publishers", rows.len());

        Ok(rows)
    }
}
