use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A registered reader. `user_id` is the opaque identifier issued upstream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub email_alias: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub async fn find_by_user_id(user_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Insert the user unless it already exists. Returns the stored row and
    /// whether this call created it.
    pub async fn find_or_create(
        user_id: &str,
        email_alias: &str,
        pool: &PgPool,
    ) -> Result<(Self, bool)> {
        let inserted = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO users (user_id, email_alias)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(email_alias)
        .fetch_optional(pool)
        .await?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        let existing = sqlx::query_as::<_, Self>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
        Ok((existing, false))
    }
}
