use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, routing::{get, post}, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::events::Notifier;
use crate::matching::factory;
use crate::{db, session, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{user_id}", post(request))
        .route("/{user_id}/accept", post(accept))
        .route("/{user_id}/chat", post(resume_chat))
}

/// Friendship between two users in either storage direction.
pub async fn status_between(
    db_pool: &SqlitePool,
    me: Uuid,
    them: Uuid,
) -> AppResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT status FROM friends
         WHERE (user_a=?1 AND user_b=?2) OR (user_a=?2 AND user_b=?1)",
    )
    .bind(me.to_string())
    .bind(them.to_string())
    .fetch_optional(db_pool)
    .await?;
    Ok(row.map(|(s,)| s))
}

#[debug_handler(state = AppState)]
async fn request(
    Path(them): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let me = session::current_user(&session).await?;
    if me == them {
        return Err(AppError::bad_request("you are already your own friend"));
    }

    let known: Option<(String,)> = sqlx::query_as("SELECT id FROM profiles WHERE id=?")
        .bind(them.to_string())
        .fetch_optional(&db_pool)
        .await?;
    if known.is_none() {
        return Err(AppError::not_found("user"));
    }
    if status_between(&db_pool, me, them).await?.is_some() {
        return Err(AppError::conflict("friend request already exists"));
    }

    // user_a is the requester; only user_b may accept
    sqlx::query("INSERT INTO friends (user_a,user_b,status,created_at) VALUES (?,?,'pending',?)")
        .bind(me.to_string())
        .bind(them.to_string())
        .bind(db::now_ms())
        .execute(&db_pool)
        .await?;

    Ok(Json(json!({ "status": "pending" })))
}

#[debug_handler(state = AppState)]
async fn accept(
    Path(them): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let me = session::current_user(&session).await?;

    let changed = sqlx::query(
        "UPDATE friends SET status='accepted' WHERE user_a=? AND user_b=? AND status='pending'",
    )
    .bind(them.to_string())
    .bind(me.to_string())
    .execute(&db_pool)
    .await?
    .rows_affected();

    if changed == 0 {
        return Err(AppError::not_found("no pending request from that user"));
    }
    Ok(Json(json!({ "status": "accepted" })))
}

#[derive(Serialize)]
struct FriendView {
    user_id: String,
    display_name: String,
    status: String,
    /// true when the other side asked and we haven't answered yet
    awaiting_me: bool,
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<FriendView>>> {
    let me = session::current_user(&session).await?;

    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT p.id, p.display_name, f.status, f.user_a
         FROM friends f
         JOIN profiles p ON p.id = CASE WHEN f.user_a=?1 THEN f.user_b ELSE f.user_a END
         WHERE f.user_a=?1 OR f.user_b=?1
         ORDER BY f.created_at DESC",
    )
    .bind(me.to_string())
    .fetch_all(&db_pool)
    .await?;

    let me_str = me.to_string();
    Ok(Json(
        rows.into_iter()
            .map(|(user_id, display_name, status, requester)| FriendView {
                awaiting_me: status == "pending" && requester != me_str,
                user_id,
                display_name,
                status,
            })
            .collect(),
    ))
}

/// Friend resume: the factory's idempotent path hands back the live shared
/// room, or a fresh one (with a plain greeting) if none exists.
#[debug_handler(state = AppState)]
async fn resume_chat(
    Path(them): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Arc<Notifier>>,
    session: Session,
) -> AppResult<Json<Value>> {
    let me = session::current_user(&session).await?;

    if status_between(&db_pool, me, them).await?.as_deref() != Some("accepted") {
        return Err(AppError::forbidden("chats resume with accepted friends only"));
    }

    let (conversation_id, created) =
        factory::get_or_create_conversation(&db_pool, &notifier, me, them, None).await?;
    Ok(Json(json!({ "conversation_id": conversation_id, "created": created })))
}
