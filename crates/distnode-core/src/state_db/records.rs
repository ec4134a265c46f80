//! Save/load of the state snapshot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use super::db::{unix_timestamp, StateDb};
use super::{StateSnapshot, StateStore};
use crate::health::ResponseTimesSnapshot;
use crate::object::ObjectId;
use crate::pending::{Phase, PendingRecord};

#[async_trait]
impl StateStore for StateDb {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_downloads")
            .execute(&mut *tx)
            .await?;
        for record in &snapshot.pending {
            sqlx::query(
                r#"
                INSERT INTO pending_downloads (object_id, size, phase, start_offset, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(record.object_id.as_str())
            .bind(record.size as i64)
            .bind(record.phase.as_str())
            .bind(record.start_offset as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM response_times")
            .execute(&mut *tx)
            .await?;
        for (endpoint, samples) in &snapshot.response_times.samples {
            sqlx::query(
                r#"
                INSERT INTO response_times (endpoint, samples_json, updated_at)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(endpoint.as_str())
            .bind(serde_json::to_string(samples)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self) -> Result<StateSnapshot> {
        let rows = sqlx::query(
            r#"
            SELECT object_id, size, phase, start_offset
            FROM pending_downloads
            ORDER BY object_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let object_id: String = row.get("object_id");
            let phase: String = row.get("phase");
            let size: i64 = row.get("size");
            let start_offset: i64 = row.get("start_offset");
            pending.push(PendingRecord {
                phase: Phase::parse(&phase)
                    .with_context(|| format!("unknown phase {phase:?} for object {object_id}"))?,
                object_id: ObjectId::from(object_id),
                size: size.max(0) as u64,
                start_offset: start_offset.max(0) as u64,
            });
        }

        let rows = sqlx::query("SELECT endpoint, samples_json FROM response_times")
            .fetch_all(&self.pool)
            .await?;
        let mut response_times = ResponseTimesSnapshot::default();
        for row in rows {
            let endpoint: String = row.get("endpoint");
            let samples_json: String = row.get("samples_json");
            let samples: Vec<u64> = serde_json::from_str(&samples_json)
                .with_context(|| format!("bad samples for {endpoint}"))?;
            response_times.samples.insert(endpoint, samples);
        }

        Ok(StateSnapshot {
            pending,
            response_times,
        })
    }
}
