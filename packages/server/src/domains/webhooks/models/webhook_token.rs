use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;

/// Seen webhook tokens. A row that has not expired means the token was
/// already used.
pub struct WebhookToken;

impl WebhookToken {
    /// Record `key` unless an unexpired row exists. Returns true when this
    /// call recorded it.
    pub async fn claim(key: &str, ttl: Duration, pool: &PgPool) -> Result<bool> {
        let claimed = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO webhook_tokens (token, expires_at)
            VALUES ($1, NOW() + $2 * INTERVAL '1 millisecond')
            ON CONFLICT (token) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            WHERE webhook_tokens.expires_at <= NOW()
            RETURNING token
            "#,
        )
        .bind(key)
        .bind(ttl.as_millis() as i64)
        .fetch_optional(pool)
        .await?;

        Ok(claimed.is_some())
    }

    pub async fn exists(key: &str, pool: &PgPool) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM webhook_tokens WHERE token = $1 AND expires_at > NOW())",
        )
        .bind(key)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn set_with_ttl(key: &str, ttl: Duration, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_tokens (token, expires_at)
            VALUES ($1, NOW() + $2 * INTERVAL '1 millisecond')
            ON CONFLICT (token) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(ttl.as_millis() as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM webhook_tokens WHERE expires_at <= NOW()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
