//! Last-run bookkeeping per sync job.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::Database;
use crate::error::StoreResult;

impl Database {
    /// Record that job `name` ran at `at`.
    pub async fn touch_api_status(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let name = name.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO api_status (name, last_run) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET last_run = excluded.last_run",
                params![name, at],
            )?;
            Ok(())
        })
        .await
    }

    /// When job `name` last ran, if ever.
    pub async fn api_status(&self, name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let name = name.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT last_run FROM api_status WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_touch_overwrites_single_row() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.api_status("surge_alerts").await.unwrap().is_none());

        let first = Utc::now();
        db.touch_api_status("surge_alerts", first).await.unwrap();
        let second = first + chrono::Duration::minutes(5);
        db.touch_api_status("surge_alerts", second).await.unwrap();

        assert_eq!(db.api_status("surge_alerts").await.unwrap(), Some(second));
        let rows: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM api_status", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
