use clap::{Args as ClapArgs, ValueEnum};

const EVENTS_PATH: &str = "./user_events.csv";
const DB_PATH: &str = "./events.db";
const OUTPUT_DIR: &str = "./";
const POSTGRES_HOST: &str = "localhost";
const POSTGRES_PORT: u16 = 5432;
const POSTGRES_USER: &str = "postgres";
const POSTGRES_DB: &str = "events";

/// Where the `user_events` history is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// A CSV or Parquet export of `user_events`
    File,
    /// A PostgreSQL database holding the `user_events` table
    #[value(name = "postgresql", alias = "postgres")]
    Postgres,
    /// A local SQLite file holding the `user_events` table
    #[value(name = "sqlite", alias = "sqlite3")]
    Sqlite,
}

#[derive(ClapArgs, Debug)]
pub struct Config {
    #[arg(long, value_enum, default_value_t = SourceKind::File, env = "DB_TYPE")]
    pub(crate) source: SourceKind,

    #[arg(long, default_value = EVENTS_PATH, env = "EVENTS_PATH")]
    pub(crate) events_path: String,

    #[arg(long, default_value = DB_PATH, env = "DB_PATH")]
    pub(crate) db_path: String,

    #[arg(long, env = "DATABASE_URL")]
    pub(crate) database_url: Option<String>,

    #[arg(long, default_value = POSTGRES_HOST, env = "POSTGRES_HOST")]
    pub(crate) postgres_host: String,

    #[arg(long, default_value_t = POSTGRES_PORT, env = "POSTGRES_PORT")]
    pub(crate) postgres_port: u16,

    #[arg(long, default_value = POSTGRES_USER, env = "POSTGRES_USER")]
    pub(crate) postgres_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub(crate) postgres_password: Option<String>,

    #[arg(long, default_value = POSTGRES_DB, env = "POSTGRES_DB")]
    pub(crate) postgres_db: String,

    #[arg(long, default_value = OUTPUT_DIR, env = "OUTPUT_DIR")]
    pub(crate) output_dir: String,
}

impl Config {
    /// Connection string for the event database. A full `DATABASE_URL` wins over
    /// the individual `POSTGRES_*` settings.
    pub fn postgres_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let credentials = match &self.postgres_password {
            Some(password) => format!("{}:{}", self.postgres_user, password),
            None => self.postgres_user.clone(),
        };

        format!(
            "postgresql://{}@{}:{}/{}",
            credentials, self.postgres_host, self.postgres_port, self.postgres_db
        )
    }
}

#[cfg(test)]
pub(crate) fn test_config(events_path: &str, output_dir: &str) -> Config {
    Config {
        source: SourceKind::File,
        events_path: events_path.to_string(),
        db_path: DB_PATH.to_string(),
        database_url: None,
        postgres_host: POSTGRES_HOST.to_string(),
        postgres_port: POSTGRES_PORT,
        postgres_user: POSTGRES_USER.to_string(),
        postgres_password: None,
        postgres_db: POSTGRES_DB.to_string(),
        output_dir: output_dir.to_string(),
    }
}
