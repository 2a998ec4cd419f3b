pub mod msg;
mod room;
mod ws;

use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, routing::{get, post}, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::events::Notifier;
use crate::{db, session, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::inbox))
        .route("/{conversation_id}", get(room::snapshot))
        .route("/{conversation_id}/messages", post(send))
        .route("/{conversation_id}/skip", post(skip))
        .route("/{conversation_id}/report", post(report))
        .route("/{conversation_id}/ws", get(ws::conversation_ws))
}

#[derive(Deserialize)]
struct SendBody {
    content: String,
}

#[debug_handler(state = AppState)]
async fn send(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Arc<Notifier>>,
    session: Session,
    Json(SendBody { content }): Json<SendBody>,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;
    let event = msg::send_msg(&db_pool, &notifier, conversation_id, user_id, &content).await?;
    Ok(Json(serde_json::to_value(event)?))
}

#[debug_handler(state = AppState)]
async fn skip(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Arc<Notifier>>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;
    msg::skip(&db_pool, &notifier, conversation_id, user_id).await?;
    Ok(Json(json!({ "ended": true })))
}

#[derive(Deserialize)]
struct ReportBody {
    reason: String,
}

#[debug_handler(state = AppState)]
async fn report(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(ReportBody { reason }): Json<ReportBody>,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;
    if reason.trim().is_empty() {
        return Err(AppError::bad_request("a report needs a reason"));
    }

    if !msg::is_participant(&db_pool, conversation_id, user_id).await? {
        return Err(AppError::forbidden("not in this conversation"));
    }
    let partner: Option<(String,)> = sqlx::query_as(
        "SELECT user_id FROM participants WHERE conversation_id=? AND user_id<>?",
    )
    .bind(conversation_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&db_pool)
    .await?;
    let Some((reported_id,)) = partner else {
        return Err(AppError::not_found("conversation"));
    };

    sqlx::query("INSERT INTO reports (id,reporter_id,reported_id,reason,created_at) VALUES (?,?,?,?,?)")
        .bind(Uuid::now_v7().to_string())
        .bind(user_id.to_string())
        .bind(&reported_id)
        .bind(reason.trim())
        .bind(db::now_ms())
        .execute(&db_pool)
        .await?;

    tracing::info!(%user_id, reported_id, "user reported");
    Ok(Json(json!({ "reported": true })))
}
