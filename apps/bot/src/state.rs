//! Per-chat dialogue state, persisted in the `bot_sessions` table so a
//! restart doesn't drop people mid-booking. Sessions carry a TTL; an
//! abandoned dialogue simply expires.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// How long an idle dialogue survives.
const SESSION_TTL_MIN: i64 = 30;

/// Where the chat is in the booking dialogue. Serialized as tagged
/// JSON into `bot_sessions.state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ChatState {
    ChoosingService,
    ChoosingDate {
        service_id: i64,
    },
    ChoosingTime {
        service_id: i64,
        date: String,
    },
    AwaitingName {
        service_id: i64,
        date: String,
        time: String,
    },
    AwaitingPhone {
        service_id: i64,
        date: String,
        time: String,
        name: String,
    },
    Confirming {
        service_id: i64,
        date: String,
        time: String,
        name: String,
        phone: String,
    },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub vendor_slug: String,
    pub state: ChatState,
}

fn expiry() -> String {
    (Utc::now() + Duration::minutes(SESSION_TTL_MIN))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Load the live session for a chat, if any. Expired rows are treated
/// as absent.
pub async fn load(pool: &SqlitePool, chat_id: i64) -> anyhow::Result<Option<Session>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT vendor_slug, state FROM bot_sessions WHERE chat_id = ? AND expires_at > ?",
    )
    .bind(chat_id)
    .bind(now_str())
    .fetch_optional(pool)
    .await?;

    let Some((vendor_slug, state_json)) = row else {
        return Ok(None);
    };
    match serde_json::from_str(&state_json) {
        Ok(state) => Ok(Some(Session { vendor_slug, state })),
        Err(e) => {
            // Stale format after an upgrade: drop it and start over
            tracing::warn!("dropping unreadable session for chat {}: {}", chat_id, e);
            clear(pool, chat_id).await?;
            Ok(None)
        }
    }
}

/// Save the state and push the expiry forward.
pub async fn save(
    pool: &SqlitePool,
    chat_id: i64,
    vendor_slug: &str,
    state: &ChatState,
) -> anyhow::Result<()> {
    let state_json = serde_json::to_string(state)?;
    sqlx::query(
        "INSERT INTO bot_sessions (chat_id, vendor_slug, state, expires_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(chat_id) DO UPDATE SET
           vendor_slug = excluded.vendor_slug,
           state = excluded.state,
           expires_at = excluded.expires_at",
    )
    .bind(chat_id)
    .bind(vendor_slug)
    .bind(state_json)
    .bind(expiry())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear(pool: &SqlitePool, chat_id: i64) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM bot_sessions WHERE chat_id = ?")
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Periodic sweep of expired rows. Expiry is also enforced on read,
/// this just keeps the table small.
pub async fn sweep_expired(pool: &SqlitePool) {
    match sqlx::query("DELETE FROM bot_sessions WHERE expires_at <= ?")
        .bind(now_str())
        .execute(pool)
        .await
    {
        Ok(result) if result.rows_affected() > 0 => {
            tracing::info!("swept {} expired bot sessions", result.rows_affected());
        }
        Ok(_) => {}
        Err(e) => tracing::error!("session sweep failed: {}", e),
    }
}
