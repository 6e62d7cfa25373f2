use crate::config::Config;
use crate::data;
use crate::error::Error;
use datafusion::prelude::{CsvReadOptions, DataFrame, ParquetReadOptions, SessionContext};
use std::fs;
use std::path::Path;

#[async_trait::async_trait]
pub trait EventLoader: Send + Sync + 'static {
    /// Loads the event log.
    ///
    /// # Arguments
    /// * `ctx` - The session context for the DataFrame operations.
    ///
    /// # Returns
    /// A Result containing either a normalized DataFrame of events or an Error.
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame, Error>;
}

/// Reads a `user_events` export from a CSV or Parquet file.
#[derive(Clone)]
pub struct FileEventLoader {
    file_path: String,
}

impl FileEventLoader {
    pub fn new(config: &Config) -> Self {
        FileEventLoader {
            file_path: config.events_path.clone(),
        }
    }
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Reads a CSV file with every column as nullable Utf8. Typing is left to
/// [`data::normalize_events`], so a late row never contradicts an inferred type.
async fn read_utf8_csv(ctx: &SessionContext, path: &str) -> Result<DataFrame, Error> {
    let schema = data::utf8_csv_schema(fs::File::open(path)?)?;
    let file_extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();

    let options = CsvReadOptions::new()
        .schema(&schema)
        .file_extension(&file_extension);

    Ok(ctx.read_csv(path, options).await?)
}

#[async_trait::async_trait]
impl EventLoader for FileEventLoader {
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame, Error> {
        if fs::metadata(&self.file_path).is_err() {
            return Err(Error::EventFileNotFound {
                path: self.file_path.clone(),
            });
        }

        let df = match extension(&self.file_path).as_deref() {
            Some("csv") => read_utf8_csv(ctx, &self.file_path).await?,
            Some("parquet") => {
                ctx.read_parquet(&self.file_path, ParquetReadOptions::default())
                    .await?
            }
            _ => {
                return Err(Error::UnsupportedEventFile {
                    path: self.file_path.clone(),
                })
            }
        };

        data::normalize_events(df)
    }
}

/// Resolves the `--users` argument to a list of user ids.
///
/// An existing file is read as CSV and its `user_id` (or `external_user_id`)
/// column is used; anything else is taken as a comma-separated list.
pub async fn load_user_list(ctx: &SessionContext, users: &str) -> Result<Vec<String>, Error> {
    let user_ids = if Path::new(users).is_file() {
        let df = read_utf8_csv(ctx, users).await?;

        let column = ["user_id", data::USER_ID]
            .into_iter()
            .find(|name| df.schema().has_column_with_unqualified_name(name))
            .ok_or_else(|| Error::MissingUserColumn {
                path: users.to_string(),
                available: df
                    .schema()
                    .fields()
                    .iter()
                    .map(|field| field.name().as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        data::string_values(df, column).await?
    } else {
        users
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    };

    if user_ids.is_empty() {
        return Err(Error::NoData {
            message: "No users found".to_string(),
        });
    }

    Ok(user_ids)
}
