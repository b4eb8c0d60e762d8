//! `PostgreSQL` account storage.
//!
//! Every security-relevant mutation is a single conditional `UPDATE`, so
//! concurrent logins against one account cannot lose an increment and a
//! one-time code cannot be consumed twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ratna_core::{AccountId, Email, Role};

use super::{AccountStore, PgStore, RepositoryError};
use crate::models::{Account, CredentialUpdate, FailedLogin, IssuedCode, NewAccount};

const ACCOUNT_COLUMNS: &str = "id, email, name, phone, role, email_verified, password_hash, \
     password_history, password_changed_at, failed_login_attempts, locked_until, last_login_at, \
     verification_code, verification_expires_at, reset_code, reset_expires_at, created_at, \
     updated_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: AccountId,
    email: Email,
    name: String,
    phone: Option<String>,
    role: Role,
    email_verified: bool,
    password_hash: String,
    password_history: Vec<String>,
    password_changed_at: DateTime<Utc>,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    verification_code: Option<String>,
    verification_expires_at: Option<DateTime<Utc>>,
    reset_code: Option<String>,
    reset_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn issued(code: Option<String>, expires_at: Option<DateTime<Utc>>) -> Option<IssuedCode> {
    match (code, expires_at) {
        (Some(code), Some(expires_at)) => Some(IssuedCode { code, expires_at }),
        _ => None,
    }
}

impl From<AccountRow> for Account {
    fn from(r: AccountRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            name: r.name,
            phone: r.phone,
            role: r.role,
            email_verified: r.email_verified,
            password_hash: r.password_hash,
            password_history: r.password_history,
            password_changed_at: r.password_changed_at,
            failed_login_attempts: r.failed_login_attempts,
            locked_until: r.locked_until,
            last_login_at: r.last_login_at,
            verification_code: issued(r.verification_code, r.verification_expires_at),
            reset_code: issued(r.reset_code, r.reset_expires_at),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let sql = format!(
            "INSERT INTO account (email, name, phone, password_hash, password_history, \
                 password_changed_at, verification_code, verification_expires_at, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, ARRAY[$4], $5, $6, $7, $5, $5) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&account.email)
            .bind(&account.name)
            .bind(&account.phone)
            .bind(&account.password_hash)
            .bind(account.created_at)
            .bind(&account.verification_code.code)
            .bind(account.verification_code.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_unique(e, "email"))?;

        Ok(row.into())
    }

    async fn account_by_email(&self, email: &Email) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE email = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn consume_verification_code(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE account
            SET email_verified = TRUE,
                verification_code = NULL,
                verification_expires_at = NULL,
                updated_at = $3
            WHERE id = $1
              AND verification_code = $2
              AND verification_expires_at >= $3
            ",
        )
        .bind(id)
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_verification_code(
        &self,
        id: AccountId,
        code: IssuedCode,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE account
            SET verification_code = $2, verification_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(&code.code)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn replace_reset_code(
        &self,
        id: AccountId,
        code: IssuedCode,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE account
            SET reset_code = $2, reset_expires_at = $3, reset_failures = 0, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(&code.code)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_reset_miss(
        &self,
        id: AccountId,
        max_misses: i32,
    ) -> Result<bool, RepositoryError> {
        let discarded: Option<bool> = sqlx::query_scalar(
            r"
            UPDATE account
            SET reset_failures = reset_failures + 1,
                reset_code = CASE WHEN reset_failures + 1 >= $2 THEN NULL ELSE reset_code END,
                reset_expires_at =
                    CASE WHEN reset_failures + 1 >= $2 THEN NULL ELSE reset_expires_at END,
                updated_at = NOW()
            WHERE id = $1 AND reset_code IS NOT NULL
            RETURNING reset_code IS NULL
            ",
        )
        .bind(id)
        .bind(max_misses)
        .fetch_optional(&self.pool)
        .await?;

        Ok(discarded.unwrap_or(false))
    }

    async fn record_failed_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<FailedLogin, RepositoryError> {
        // Right-hand sides see the pre-update row.
        let row: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            r"
            UPDATE account
            SET failed_login_attempts =
                    CASE WHEN locked_until <= $2 THEN 0 ELSE failed_login_attempts END + 1,
                locked_until = CASE
                    WHEN (CASE WHEN locked_until <= $2 THEN 0 ELSE failed_login_attempts END) + 1 >= $3
                        THEN $4
                    WHEN locked_until <= $2 THEN NULL
                    ELSE locked_until
                END,
                updated_at = $2
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            ",
        )
        .bind(id)
        .bind(now)
        .bind(threshold)
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await?;

        let (attempts, locked_until) = row.ok_or(RepositoryError::NotFound)?;
        Ok(FailedLogin {
            attempts,
            locked_until,
        })
    }

    async fn record_successful_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE account
            SET failed_login_attempts = 0,
                locked_until = NULL,
                last_login_at = $2,
                updated_at = $2
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_credential(
        &self,
        id: AccountId,
        expected_hash: &str,
        reset_code: Option<&str>,
        update: CredentialUpdate,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE account
            SET password_hash = $3,
                password_history = $4,
                password_changed_at = $5,
                reset_code = NULL,
                reset_expires_at = NULL,
                reset_failures = 0,
                failed_login_attempts = 0,
                locked_until = NULL,
                updated_at = $5
            WHERE id = $1
              AND password_hash = $2
              AND ($6::TEXT IS NULL OR (reset_code = $6 AND reset_expires_at >= $5))
            ",
        )
        .bind(id)
        .bind(expected_hash)
        .bind(&update.password_hash)
        .bind(&update.password_history)
        .bind(update.changed_at)
        .bind(reset_code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_role(&self, email: &Email, role: Role) -> Result<Account, RepositoryError> {
        let sql = format!(
            "UPDATE account SET role = $2, updated_at = NOW() WHERE email = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email)
            .bind(role)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Into::into).ok_or(RepositoryError::NotFound)
    }
}
