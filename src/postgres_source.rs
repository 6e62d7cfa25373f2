//! `user_events` table in PostgreSQL as an [`EventSource`].

use crate::error::Error;
use crate::event::{EventType, ReactivationWindow};
use crate::event_source::{EventSource, PublisherSplit};
use chrono::NaiveDateTime;
use log::info;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;

const MAX_CONNECTIONS: u32 = 5;

fn to_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct PostgresEventSource {
    pool: PgPool,
}

impl PostgresEventSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool and checks the connection with a trivial query.
    ///
    /// # Errors
    /// [`Error::Database`] when the database is unreachable.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await?;

        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await?;
        info!("connected to event database");

        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl EventSource for PostgresEventSource {
    async fn events_of_type_in_range(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(String, NaiveDateTime)>, Error> {
        let rows = sqlx::query_as::<_, (String, NaiveDateTime)>(
            "SELECT external_user_id, event_date FROM user_events \
             WHERE event_type = $1 AND event_date >= $2 AND event_date < $3 \
             AND external_user_id IS NOT NULL \
             ORDER BY event_date, external_user_id",
        )
        .bind(event_type.as_str())
        .bind(window.lower_bound())
        .bind(window.upper_bound_exclusive())
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
             WHERE external_user_id = $1 AND event_type = $2 AND event_date < $3",
        )
        .bind(user_id)
        .bind(event_type.as_str())
        .bind(before)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }

    async fn latest_events_before(
        &self,
        event_type: &EventType,
        anchors: &[(String, NaiveDateTime)],
    ) -> Result<Vec<Option<NaiveDateTime>>, Error> {
        if anchors.is_empty() {
            return Ok(vec![]);
        }

        let (user_ids, timestamps): (Vec<String>, Vec<NaiveDateTime>) =
            anchors.iter().cloned().unzip();

        let rows = sqlx::query_as::<_, (String, Option<NaiveDateTime>)>(
            "SELECT a.user_id, MAX(e.event_date) \
             FROM UNNEST($1::text[], $2::timestamp[]) AS a(user_id, anchor) \
             LEFT JOIN user_events e \
               ON e.external_user_id = a.user_id \
              AND e.event_type = $3 \
              AND e.event_date < a.anchor \
             GROUP BY a.user_id",
        )
        .bind(&user_ids)
        .bind(&timestamps)
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let priors: HashMap<String, Option<NaiveDateTime>> = rows.into_iter().collect();

        Ok(user_ids
            .iter()
            .map(|user_id| priors.get(user_id).copied().flatten())
            .collect())
    }

    async fn count_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(i64, u64)>, Error> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT publisher_id::bigint, COUNT(*) FROM user_events \
             WHERE event_type = $1 AND event_date >= $2 AND event_date < $3 \
             AND publisher_id IS NOT NULL \
             GROUP BY publisher_id ORDER BY publisher_id",
        )
        .bind(event_type.as_str())
        .bind(window.lower_bound())
        .bind(window.upper_bound_exclusive())
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
                 WHERE event_type = $1 GROUP BY external_user_id \
             ) \
             SELECT e.publisher_id::bigint, COUNT(*), \
                    SUM(CASE WHEN e.event_date = f.first_date THEN 1 ELSE 0 END)::bigint \
             FROM user_events e \
             JOIN first_ever f ON f.external_user_id = e.external_user_id \
             WHERE e.event_type = $1 AND e.event_date >= $2 AND e.event_date < $3 \
             AND e.publisher_id IS NOT NULL \
             GROUP BY e.publisher_id ORDER BY e.publisher_id",
        )
        .bind(event_type.as_str())
        .bind(window.lower_bound())
        .bind(window.upper_bound_exclusive())
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

    const ROWS: &[(&str, &str, Option<i64>)] = &[
        ("u1", "2024-12-01 09:00:00", Some(7)),
        ("u1", "2025-01-01 09:00:00", Some(7)),
        ("u1", "2025-01-10 12:00:00", Some(9)),
        ("u2", "2025-01-08 00:00:00", Some(9)),
        ("u2", "2025-01-31 23:59:59", None),
        ("u3", "2025-02-01 00:00:00", Some(7)),
    ];

    /// Connects to `DATABASE_URL` with a single session and shadows `user_events`
    /// with a seeded temporary table. `None` when no database is configured.
    async fn seeded_source() -> Result<Option<PostgresEventSource>, Error> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect(&url)
            .await?;

        sqlx::query(
            "CREATE TEMP TABLE user_events ( \
                 external_user_id text, \
                 event_type text NOT NULL, \
                 event_date timestamp NOT NULL, \
                 publisher_id bigint \
             )",
        )
        .execute(&pool)
        .await?;

        for (user_id, date, publisher_id) in ROWS {
            sqlx::query(
                "INSERT INTO user_events (external_user_id, event_type, event_date, publisher_id) \
                 VALUES ($1, 'deposit', $2, $3)",
            )
            .bind(*user_id)
            .bind(ts(date))
            .bind(*publisher_id)
            .execute(&pool)
            .await?;
        }

        Ok(Some(PostgresEventSource::new(pool)))
    }

    fn history() -> EventHistory {
        EventHistory::from_events(
            ROWS.iter()
                .map(|(user_id, date, publisher_id)| {
                    let event = Event::deposit(user_id, ts(date));
                    match publisher_id {
                        Some(id) => event.with_publisher(*id),
                        None => event,
                    }
                })
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_postgres_queries_match_history() -> Result<(), Error> {
        let Some(source) = seeded_source().await? else {
            eprintln!("DATABASE_URL not set, skipping");
            return Ok(());
        };
        let history = history();
        let w = window("2025-01-01", "2025-01-31");

        let mut from_db = source
            .events_of_type_in_range(&EventType::Deposit, &w)
            .await?;
        let mut expected = history.events_of_type_in_range(&EventType::Deposit, &w).await?;
        from_db.sort();
        expected.sort();
        assert_eq!(from_db, expected);

        // batched lookup includes a user without any deposit
        let anchors = vec![
            ("u1".to_string(), ts("2025-01-01 09:00:00")),
            ("u2".to_string(), ts("2025-01-08 00:00:00")),
            ("nobody".to_string(), ts("2025-01-08 00:00:00")),
            ("u1".to_string(), ts("2025-01-10 12:00:00")),
        ];
        let batched = source
            .latest_events_before(&EventType::Deposit, &anchors[..3])
            .await?;
        assert_eq!(
            batched,
            history
                .latest_events_before(&EventType::Deposit, &anchors[..3])
                .await?
        );
        assert_eq!(
            source
                .latest_event_before("u1", &EventType::Deposit, anchors[3].1)
                .await?,
            Some(ts("2025-01-01 09:00:00"))
        );

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
}
