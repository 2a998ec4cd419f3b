use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{session, AppError, AppResult, AppState};

use super::msg;

#[derive(Serialize)]
pub(crate) struct PartnerView {
    id: String,
    display_name: String,
    avatar_url: Option<String>,
    friend_status: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct MessageView {
    id: String,
    sender_id: Option<String>,
    content: String,
    created_at: i64,
    control: bool,
}

#[derive(Serialize)]
pub(crate) struct ConversationView {
    id: String,
    partner: Option<PartnerView>,
    messages: Vec<MessageView>,
    ended: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn snapshot(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<ConversationView>> {
    let user_id = session::current_user(&session).await?;
    if !msg::is_participant(&db_pool, conversation_id, user_id).await? {
        return Err(AppError::not_found("conversation"));
    }

    let partner: Option<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT p.id, p.display_name, p.avatar_url
         FROM participants pt JOIN profiles p ON p.id=pt.user_id
         WHERE pt.conversation_id=? AND pt.user_id<>?",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&db_pool)
    .await?;

    let partner = match partner {
        Some((id, display_name, avatar_url)) => {
            let friend_status =
                crate::friends::status_between(&db_pool, user_id, Uuid::parse_str(&id)?).await?;
            Some(PartnerView { id, display_name, avatar_url, friend_status })
        }
        None => None,
    };

    let rows: Vec<(String, Option<String>, String, i64)> = sqlx::query_as(
        "SELECT id,sender_id,content,created_at FROM messages
         WHERE conversation_id=? ORDER BY created_at, id",
    )
    .bind(conversation_id.to_string())
    .fetch_all(&db_pool)
    .await?;

    let ended = msg::is_ended(&db_pool, conversation_id).await?;
    let messages = rows
        .into_iter()
        .map(|(id, sender_id, content, created_at)| MessageView {
            control: msg::is_control(&content),
            id,
            sender_id,
            content,
            created_at,
        })
        .collect();

    Ok(Json(ConversationView { id: conversation_id.to_string(), partner, messages, ended }))
}

#[derive(Serialize)]
pub(crate) struct InboxEntry {
    conversation_id: String,
    partner_id: String,
    partner_name: String,
    updated_at: i64,
}

// only live rooms with accepted friends; skipped or anonymous rooms stay
// ephemeral
#[debug_handler(state = AppState)]
pub(crate) async fn inbox(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<InboxEntry>>> {
    let user_id = session::current_user(&session).await?;

    let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT c.id, p.id, p.display_name, c.updated_at
         FROM conversations c
         JOIN participants me ON me.conversation_id=c.id AND me.user_id=?1
         JOIN participants them ON them.conversation_id=c.id AND them.user_id<>?1
         JOIN profiles p ON p.id=them.user_id
         JOIN friends f ON f.status='accepted'
                       AND ((f.user_a=?1 AND f.user_b=them.user_id)
                         OR (f.user_b=?1 AND f.user_a=them.user_id))
         WHERE c.pair_key IS NOT NULL
         ORDER BY c.updated_at DESC",
    )
    .bind(user_id.to_string())
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(conversation_id, partner_id, partner_name, updated_at)| InboxEntry {
                conversation_id,
                partner_id,
                partner_name,
                updated_at,
            })
            .collect(),
    ))
}
