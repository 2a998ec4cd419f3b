use sqlx::SqlitePool;
use uuid::Uuid;

use crate::events::{self, Event, Notifier};
use crate::{db, AppError, AppResult};

/// Messages starting with this are control signals, never chat bubbles.
pub const CONTROL_PREFIX: &str = "::sys:";
pub const SKIP_CONTROL: &str = "::sys:skip";
const MATCHED_CONTROL: &str = "::sys:matched:";

pub fn is_control(content: &str) -> bool {
    content.starts_with(CONTROL_PREFIX)
}

pub fn matched_greeting(shared_interest: Option<&str>) -> String {
    format!("{MATCHED_CONTROL}{}", shared_interest.unwrap_or(""))
}

/// Reads the shared interest back out of the greeting.
pub async fn greeting_interest(
    pool: &SqlitePool,
    conversation_id: Uuid,
) -> AppResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT content FROM messages
         WHERE conversation_id=? AND sender_id IS NULL AND content LIKE '::sys:matched:%'
         LIMIT 1",
    )
    .bind(conversation_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|(content,)| {
        let tag = content.strip_prefix(MATCHED_CONTROL)?;
        if tag.is_empty() { None } else { Some(tag.to_owned()) }
    }))
}

/// A persisted skip message is the one and only "this room is over" fact.
pub async fn is_ended(pool: &SqlitePool, conversation_id: Uuid) -> AppResult<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM messages WHERE conversation_id=? AND content=? LIMIT 1")
            .bind(conversation_id.to_string())
            .bind(SKIP_CONTROL)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn is_participant(
    pool: &SqlitePool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM participants WHERE conversation_id=? AND user_id=?")
            .bind(conversation_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub(crate) async fn insert_system(
    pool: &SqlitePool,
    conversation_id: Uuid,
    content: &str,
) -> AppResult<Event> {
    insert_message(pool, conversation_id, None, content).await
}

async fn insert_message(
    pool: &SqlitePool,
    conversation_id: Uuid,
    sender_id: Option<Uuid>,
    content: &str,
) -> AppResult<Event> {
    let id = Uuid::now_v7();
    let now = db::now_ms();
    sqlx::query("INSERT INTO messages (id,conversation_id,sender_id,content,created_at) VALUES (?,?,?,?,?)")
        .bind(id.to_string())
        .bind(conversation_id.to_string())
        .bind(sender_id.map(|u| u.to_string()))
        .bind(content)
        .bind(now)
        .execute(pool)
        .await?;
    // bump so the inbox sorts this room to the top
    sqlx::query("UPDATE conversations SET updated_at=? WHERE id=?")
        .bind(now)
        .bind(conversation_id.to_string())
        .execute(pool)
        .await?;
    Ok(Event::Message { id, conversation_id, sender_id, content: content.to_owned(), created_at: now })
}

// check and write are one statement, so a racing skip can't let a bubble
// slip in after the end; None means the conversation has ended
async fn insert_unless_ended(
    pool: &SqlitePool,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> AppResult<Option<Event>> {
    let id = Uuid::now_v7();
    let now = db::now_ms();
    let inserted = sqlx::query(
        "INSERT INTO messages (id,conversation_id,sender_id,content,created_at)
         SELECT ?1,?2,?3,?4,?5
         WHERE NOT EXISTS (SELECT 1 FROM messages WHERE conversation_id=?2 AND content=?6)",
    )
    .bind(id.to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(content)
    .bind(now)
    .bind(SKIP_CONTROL)
    .execute(pool)
    .await?
    .rows_affected()
        == 1;
    if !inserted {
        return Ok(None);
    }
    // bump so the inbox sorts this room to the top
    sqlx::query("UPDATE conversations SET updated_at=? WHERE id=?")
        .bind(now)
        .bind(conversation_id.to_string())
        .execute(pool)
        .await?;
    Ok(Some(Event::Message {
        id,
        conversation_id,
        sender_id: Some(sender_id),
        content: content.to_owned(),
        created_at: now,
    }))
}

pub async fn send_msg(
    pool: &SqlitePool,
    notifier: &Notifier,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> AppResult<Event> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("empty message"));
    }
    if is_control(content) {
        return Err(AppError::bad_request("reserved message prefix"));
    }
    if !is_participant(pool, conversation_id, sender_id).await? {
        return Err(AppError::forbidden("not in this conversation"));
    }

    let Some(event) = insert_unless_ended(pool, conversation_id, sender_id, content).await? else {
        return Err(AppError::conflict("conversation has ended"));
    };
    notifier.publish(&events::conv_topic(conversation_id), event.clone());
    Ok(event)
}

/// Persists the skip control message and tears the match down: pair_key goes
/// NULL and both sides drop from `busy` back to `online`. Skipping an
/// already-ended room is a no-op, not an error.
pub async fn skip(
    pool: &SqlitePool,
    notifier: &Notifier,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    if !is_participant(pool, conversation_id, user_id).await? {
        return Err(AppError::forbidden("not in this conversation"));
    }

    // only the first skip writes; a concurrent or repeated skip is a no-op
    let Some(event) = insert_unless_ended(pool, conversation_id, user_id, SKIP_CONTROL).await? else {
        return Ok(());
    };
    sqlx::query("UPDATE conversations SET pair_key=NULL WHERE id=?")
        .bind(conversation_id.to_string())
        .execute(pool)
        .await?;
    sqlx::query(
        "UPDATE profiles SET match_status='online'
         WHERE match_status='busy'
           AND id IN (SELECT user_id FROM participants WHERE conversation_id=?)",
    )
    .bind(conversation_id.to_string())
    .execute(pool)
    .await?;

    let topic = events::conv_topic(conversation_id);
    notifier.publish(&topic, event);
    notifier.publish(&topic, Event::Skipped { conversation_id, by: user_id });
    tracing::info!(%conversation_id, %user_id, "conversation skipped");
    Ok(())
}
