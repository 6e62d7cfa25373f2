//! `user_events` table in a local SQLite database as an [`EventSource`].
//!
//! SQLite stores `event_date` as `YYYY-MM-DD HH:MM:SS` text, so every bound
//! timestamp is formatted the same way and compared as text.

use crate::error::Error;
use crate::event::{EventType, ReactivationWindow};
use crate::event_source::{EventSource, PublisherSplit};
use chrono::NaiveDateTime;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fs;

const MAX_CONNECTIONS: u32 = 5;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn sql_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn to_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct SqliteEventSource {
    pool: SqlitePool,
}

impl SqliteEventSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens an existing database file read-only.
    ///
    /// # Errors
    /// [`Error::DatabaseFileNotFound`] when `path` does not exist,
    /// [`Error::Database`] when it cannot be opened.
    pub async fn connect(path: &str) -> Result<Self, Error> {
        if fs::metadata(path).is_err() {
            return Err(Error::DatabaseFileNotFound {
                path: path.to_string(),
            });
        }

        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await?;
        info!("opened event database {}", path);

        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl EventSource for SqliteEventSource {
    async fn events_of_type_in_range(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(String, NaiveDateTime)>, Error> {
        let rows = sqlx::query_as::<_, (String, NaiveDateTime)>(
            "SELECT external_user_id, event_date FROM user_events \
             WHERE event_type = ?1 AND event_date >= ?2 AND event_date < ?3 \
             AND external_user_id IS NOT NULL AND external_user_id != '' \
             ORDER BY event_date, external_user_id",
        )
        .bind(event_type.as_str())
        .bind(sql_timestamp(window.lower_bound()))
        .bind(sql_timestamp(window.upper_bound_exclusive()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn latest_event_before(
        &self,
        user_id: &str,
        event_type: &EventType,
        before: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, Error> {
        let latest = sqlx::query_scalar::<_, Option<NaiveDateTime>>(
            "SELECT MAX(event_date) FROM user_events \
             WHERE external_user_id = ?1 AND event_type = ?2 AND event_date < ?3",
        )
        .bind(user_id)
        .bind(event_type.as_str())
        .bind(sql_timestamp(before))
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn count_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(i64, u64)>, Error> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT publisher_id, COUNT(*) FROM user_events \
             WHERE event_type = ?1 AND event_date >= ?2 AND event_date < ?3 \
             AND publisher_id IS NOT NULL \
             GROUP BY publisher_id ORDER BY publisher_id",
        )
        .bind(event_type.as_str())
        .bind(sql_timestamp(window.lower_bound()))
        .bind(sql_timestamp(window.upper_bound_exclusive()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(publisher_id, count)| (publisher_id, to_count(count)))
            .collect())
    }

    async fn first_and_repeat_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<PublisherSplit>, Error> {
        let rows = sqlx::query_as::<_, (i64, i64, i64)>(
            "WITH first_ever AS ( \
                 SELECT external_user_id, MIN(event_date) AS first_date FROM user_events \
                 WHERE event_type = ?1 GROUP BY external_user_id \
             ) \
             SELECT e.publisher_id, COUNT(*), \
                    SUM(CASE WHEN e.event_date = f.first_date THEN 1 ELSE 0 END) \
             FROM user_events e \
             JOIN first_ever f ON f.external_user_id = e.external_user_id \
             WHERE e.event_type = ?1 AND e.event_date >= ?2 AND e.event_date < ?3 \
             AND e.publisher_id IS NOT NULL \
             GROUP BY e.publisher_id ORDER BY e.publisher_id",
        )
        .bind(event_type.as_str())
        .bind(sql_timestamp(window.lower_bound()))
        .bind(sql_timestamp(window.upper_bound_exclusive()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(publisher_id, total, first)| PublisherSplit {
                publisher_id,
                total: to_count(total),
                first: to_count(first),
                repeat: to_count(total - first),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ts, window, Event};
    use crate::event_source::EventHistory;
    use tempfile::TempDir;

    const ROWS: &[(&str, &str, &str, Option<i64>)] = &[
        ("e1", "u1", "2024-12-01 09:00:00", Some(7)),
        ("e2", "u1", "2025-01-01 09:00:00", Some(7)),
        ("e3", "u1", "2025-01-10 12:00:00", Some(9)),
        ("e4", "u2", "2025-01-08 00:00:00", Some(9)),
        ("e5", "u2", "2025-01-31 23:59:59", None),
        ("e6", "u3", "2025-02-01 00:00:00", Some(7)),
    ];

    fn history() -> EventHistory {
        EventHistory::from_events(
            ROWS.iter()
                .map(|(_, user_id, date, publisher_id)| {
                    let event = Event::deposit(user_id, ts(date));
                    match publisher_id {
                        Some(id) => event.with_publisher(*id),
                        None => event,
                    }
                })
                .collect::<Vec<_>>(),
        )
    }

    async fn seed(path: &str) -> Result<(), Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE user_events ( \
                 event_id TEXT PRIMARY KEY, \
                 external_user_id TEXT, \
                 event_type TEXT NOT NULL, \
                 event_date TIMESTAMP NOT NULL, \
                 publisher_id INTEGER, \
                 deposit_amount REAL \
             )",
        )
        .execute(&pool)
        .await?;

        for (event_id, user_id, date, publisher_id) in ROWS {
            sqlx::query(
                "INSERT INTO user_events (event_id, external_user_id, event_type, event_date, publisher_id) \
                 VALUES (?1, ?2, 'deposit', ?3, ?4)",
            )
            .bind(*event_id)
            .bind(*user_id)
            .bind(*date)
            .bind(*publisher_id)
            .execute(&pool)
            .await?;
        }
        sqlx::query(
            "INSERT INTO user_events (event_id, external_user_id, event_type, event_date, publisher_id) \
             VALUES ('c1', 'u1', 'click', '2025-01-09 00:00:00', 7)",
        )
        .execute(&pool)
        .await?;

        pool.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_source_matches_history() -> Result<(), Error> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("events.db");
        let path = path.to_str().unwrap();
        seed(path).await?;

        let source = SqliteEventSource::connect(path).await?;
        let history = history();
        let w = window("2025-01-01", "2025-01-31");

        let mut from_db = source
            .events_of_type_in_range(&EventType::Deposit, &w)
            .await?;
        let mut expected = history.events_of_type_in_range(&EventType::Deposit, &w).await?;
        from_db.sort();
        expected.sort();
        assert_eq!(from_db, expected);
        assert_eq!(from_db.len(), 4);

        let anchors = vec![
            ("u1".to_string(), ts("2025-01-01 09:00:00")),
            ("u2".to_string(), ts("2025-01-08 00:00:00")),
            ("nobody".to_string(), ts("2025-01-08 00:00:00")),
        ];
        let priors = source
            .latest_events_before(&EventType::Deposit, &anchors)
            .await?;
        assert_eq!(
            priors,
            history
                .latest_events_before(&EventType::Deposit, &anchors)
                .await?
        );
        assert_eq!(priors, vec![Some(ts("2024-12-01 09:00:00")), None, None]);

        assert_eq!(
            source.count_by_publisher(&EventType::Deposit, &w).await?,
            history.count_by_publisher(&EventType::Deposit, &w).await?
        );
        assert_eq!(
            source
                .first_and_repeat_by_publisher(&EventType::Deposit, &w)
                .await?,
            history.publisher_splits(&EventType::Deposit, &w)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_database_file() {
        let result = SqliteEventSource::connect("/nonexistent/events.db").await;
        assert!(matches!(
            result.unwrap_err(),
            Error::DatabaseFileNotFound { .. }
        ));
    }
}
