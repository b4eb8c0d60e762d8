//! `PostgreSQL` notification storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ratna_core::{AccountId, NotificationId};

use super::{NotificationSink, PgStore, RepositoryError};
use crate::models::Notification;

#[async_trait]
impl NotificationSink for PgStore {
    async fn append_notification(
        &self,
        account: AccountId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO notification (account_id, message, created_at) VALUES ($1, $2, $3)")
            .bind(account)
            .bind(message)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn notifications_for(
        &self,
        account: AccountId,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows: Vec<(NotificationId, AccountId, String, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT id, account_id, message, created_at
            FROM notification
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            ",
        )
        .bind(account)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, account_id, message, created_at)| Notification {
                id,
                account_id,
                message,
                created_at,
            })
            .collect())
    }
}
