use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use tracing::info;

use crate::{
    error::{FlowError, Result},
    state::ConversationState,
    storage::SessionStorage,
};

/// PostgreSQL-backed session storage. The whole state is stored as JSONB.
pub struct PostgresSessionStorage {
    pool: PgPool,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| FlowError::Storage(format!("Failed to connect to database: {e}")))?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_sessions (
                session_id TEXT PRIMARY KEY,
                current_node TEXT NOT NULL,
                state JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("Failed to create sessions table: {e}")))?;

        info!("Session table ready");
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn save(&self, state: ConversationState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_sessions (session_id, current_node, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO UPDATE
            SET current_node = EXCLUDED.current_node,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.session_id())
        .bind(state.current_node().as_str())
        .bind(Json(&state))
        .bind(state.created_at())
        .bind(state.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| FlowError::Storage(format!("Failed to save session: {e}")))?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let row: Option<(Json<ConversationState>,)> =
            sqlx::query_as("SELECT state FROM conversation_sessions WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| FlowError::Storage(format!("Failed to load session: {e}")))?;
        Ok(row.map(|(Json(state),)| state))
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM conversation_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| FlowError::Storage(format!("Failed to delete session: {e}")))?;
        Ok(())
    }
}
