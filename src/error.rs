use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Event file {path} not found")]
    EventFileNotFound { path: String },

    #[error("Event database {path} not found")]
    DatabaseFileNotFound { path: String },

    #[error("Unsupported event file '{path}', expected a .csv or .parquet file")]
    UnsupportedEventFile { path: String },

    #[error("CSV file {path} must contain a 'user_id' or 'external_user_id' column, found: {available}")]
    MissingUserColumn { path: String, available: String },

    #[error("Spend file {path} not found")]
    SpendFileNotFound { path: String },

    #[error("Spend file {path} has no '{column}' column")]
    MissingSpendColumn { path: String, column: String },

    #[error("Column '{column}' has unexpected type {data_type}")]
    UnexpectedColumnType { column: String, data_type: String },

    #[error("{message}")]
    NoData { message: String },
}
