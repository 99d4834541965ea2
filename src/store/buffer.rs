//! Upload queue (`data_buffer`) and ring-bounded `tag_history` (§3 Sample,
//! §4.2). The Polling Engine appends samples here; the Uploader drains
//! them; the compactor enforces both ring bounds.

use crate::error::Result;
use crate::store::schema::Sample;
use crate::store::Store;
use rusqlite::{params, Row};

fn row_to_sample(row: &Row) -> rusqlite::Result<Sample> {
    Ok(Sample {
        id: row.get(0)?,
        tag_id: row.get(1)?,
        value: row.get(2)?,
        quality: row.get::<_, i64>(3)? as u8,
        timestamp: row.get(4)?,
        uploaded: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

impl Store {
    /// Appends a sample to the upload queue. Returns the new row id.
    pub async fn append_sample(
        &self,
        tag_id: &str,
        value: f64,
        quality: u8,
        timestamp_ms: i64,
        created_at_ms: i64,
    ) -> Result<i64> {
        let tag_id = tag_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO data_buffer (tag_id, value, quality, timestamp, uploaded, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![tag_id, value, quality as i64, timestamp_ms, created_at_ms],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Selects at most `limit` unuploaded samples in ascending timestamp
    /// order (§4.6 step 1).
    pub async fn fetch_unuploaded(&self, limit: i64) -> Result<Vec<Sample>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tag_id, value, quality, timestamp, uploaded, created_at
                 FROM data_buffer WHERE uploaded = 0 ORDER BY timestamp ASC, id ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], row_to_sample)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn count_unuploaded(&self) -> Result<i64> {
        self.with_conn(|conn| conn.query_row("SELECT count(*) FROM data_buffer WHERE uploaded = 0", [], |r| r.get(0)))
            .await
    }

    /// Marks a batch of sample ids uploaded in one transaction (§4.6 step 5,
    /// §8 invariant 1).
    pub async fn mark_uploaded(&self, ids: Vec<i64>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("UPDATE data_buffer SET uploaded = 1 WHERE id = ?1")?;
                for id in &ids {
                    stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Deletes uploaded samples older than `max_age_ms` (§4.2: uploaded=1
    /// AND age >= retention; §8 invariant 3: never deletes uploaded=0 rows).
    pub async fn compact_buffer(&self, now_ms: i64, max_age_ms: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            let cutoff = now_ms - max_age_ms;
            let deleted = conn.execute(
                "DELETE FROM data_buffer WHERE uploaded = 1 AND created_at <= ?1",
                [cutoff],
            )?;
            Ok(deleted)
        })
        .await
    }

    /// Enforces the `tag_history` ring bound: keeps only the most recent
    /// `max_rows` history rows overall (§3, §4.2, §9 "portable ring-buffer
    /// trigger" redesign note -- a timer task instead of a DB trigger).
    pub async fn prune_history(&self, max_rows: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row("SELECT count(*) FROM tag_history", [], |r| r.get(0))?;
            if total <= max_rows {
                return Ok(0);
            }
            let excess = total - max_rows;
            conn.execute(
                "DELETE FROM tag_history WHERE id IN (SELECT id FROM tag_history ORDER BY id ASC LIMIT ?1)",
                [excess],
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_unuploaded_orders_ascending_by_timestamp() {
        let store = Store::open_in_memory().unwrap();
        store.append_sample("t-1", 1.0, 192, 300, 300).await.unwrap();
        store.append_sample("t-1", 2.0, 192, 100, 100).await.unwrap();
        store.append_sample("t-1", 3.0, 192, 200, 200).await.unwrap();

        let samples = store.fetch_unuploaded(10).await.unwrap();
        let timestamps: Vec<i64> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn mark_uploaded_removes_from_unuploaded_set() {
        let store = Store::open_in_memory().unwrap();
        let id1 = store.append_sample("t-1", 1.0, 192, 100, 100).await.unwrap();
        store.append_sample("t-1", 2.0, 192, 200, 200).await.unwrap();

        store.mark_uploaded(vec![id1]).await.unwrap();
        let remaining = store.fetch_unuploaded(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 2.0);
    }

    #[tokio::test]
    async fn compaction_never_deletes_unuploaded_rows() {
        let store = Store::open_in_memory().unwrap();
        let id1 = store.append_sample("t-1", 1.0, 192, 100, 0).await.unwrap();
        store.append_sample("t-1", 2.0, 192, 200, 0).await.unwrap();
        store.mark_uploaded(vec![id1]).await.unwrap();

        let deleted = store.compact_buffer(10_000_000, 7 * 24 * 3600 * 1000).await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.fetch_unuploaded(10).await.unwrap();
        assert_eq!(remaining.len(), 1, "unuploaded row must survive compaction");
    }

    #[tokio::test]
    async fn prune_history_enforces_ring_bound() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            store.update_tag_value_for_test(i).await;
        }
        let deleted = store.prune_history(5).await.unwrap();
        assert_eq!(deleted, 5);
        let remaining: i64 = store
            .with_conn(|conn| conn.query_row("SELECT count(*) FROM tag_history", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(remaining, 5);
    }

    impl Store {
        async fn update_tag_value_for_test(&self, i: i64) {
            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO tag_history (tag_id, value, quality, timestamp) VALUES ('t-1', ?1, 192, ?1)",
                    [i],
                )
            })
            .await
            .unwrap();
        }
    }
}
