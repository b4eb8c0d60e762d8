//! `PostgreSQL` activity log storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ratna_core::{AccountId, ActivityId};

use super::{ActivityLog, PgStore, RepositoryError};
use crate::models::{ActivityEntry, NewActivity};

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: ActivityId,
    account_id: Option<AccountId>,
    action: String,
    detail: String,
    origin: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl ActivityLog for PgStore {
    async fn append_activity(&self, entry: NewActivity) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO activity_log (account_id, action, detail, origin, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(entry.account_id)
        .bind(entry.action.as_str())
        .bind(&entry.detail)
        .bind(&entry.origin)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r"
            SELECT id, account_id, action, detail, origin, user_agent, created_at
            FROM activity_log
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let action = r.action.parse().map_err(RepositoryError::DataCorruption)?;
                Ok(ActivityEntry {
                    id: r.id,
                    account_id: r.account_id,
                    action,
                    detail: r.detail,
                    origin: r.origin,
                    user_agent: r.user_agent,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}
