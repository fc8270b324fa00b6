use anyhow::Context;
use async_trait::async_trait;

use crate::auth::repo_types::{NewUser, Token, User, UserChanges};
use crate::db::PgRepo;

/// Persistence for users and their API tokens.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn insert_user(&self, user: NewUser) -> anyhow::Result<User>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>>;
    /// Returns the user's token, storing `candidate_key` first if they have none.
    async fn get_or_create_token(&self, user_id: i64, candidate_key: &str)
        -> anyhow::Result<Token>;
    async fn find_user_by_token(&self, key: &str) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str = "id, email, password_hash, name, is_active, is_staff, is_superuser";

#[async_trait]
impl UserRepo for PgRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, name, is_staff, is_superuser)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .fetch_one(&self.pool)
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET email         = COALESCE($2, email),
                   password_hash = COALESCE($3, password_hash),
                   name          = COALESCE($4, name),
                   is_staff      = COALESCE($5, is_staff),
                   is_superuser  = COALESCE($6, is_superuser)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.name)
        .bind(changes.is_staff)
        .bind(changes.is_superuser)
        .fetch_optional(&self.pool)
        .await
        .context("update user")?;
        Ok(user)
    }

    async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> anyhow::Result<Token> {
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (key, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(candidate_key)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("insert token")?;

        let token = sqlx::query_as::<_, Token>(
            "SELECT key, user_id, created_at FROM auth_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("load token")?;
        Ok(token)
    }

    async fn find_user_by_token(&self, key: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.password_hash, u.name, u.is_active, u.is_staff, u.is_superuser
              FROM auth_tokens t
              JOIN users u ON u.id = t.user_id
             WHERE t.key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("find user by token")?;
        Ok(user)
    }
}
