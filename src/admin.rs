use axum::{debug_handler, extract::{Path, State}, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::db::VerificationStatus;
use crate::{session, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", get(queue))
        .route("/review/{user_id}", post(review))
}

async fn require_admin(db_pool: &SqlitePool, session: &Session) -> AppResult<Uuid> {
    let user_id = session::current_user(session).await?;
    let (is_admin,): (bool,) = sqlx::query_as("SELECT is_admin FROM profiles WHERE id=?")
        .bind(user_id.to_string())
        .fetch_one(db_pool)
        .await?;
    if !is_admin {
        return Err(AppError::forbidden("admins only"));
    }
    Ok(user_id)
}

#[derive(Serialize)]
struct PendingVerification {
    user_id: String,
    display_name: String,
    verification_image: Option<String>,
}

#[debug_handler(state = AppState)]
async fn queue(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<PendingVerification>>> {
    require_admin(&db_pool, &session).await?;

    let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT id,display_name,verification_image FROM profiles
         WHERE verification_status='pending' ORDER BY created_at",
    )
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(user_id, display_name, verification_image)| PendingVerification {
                user_id,
                display_name,
                verification_image,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Verdict {
    Approve,
    Reject,
}

#[derive(Deserialize)]
struct ReviewBody {
    verdict: Verdict,
}

#[debug_handler(state = AppState)]
async fn review(
    Path(user_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(ReviewBody { verdict }): Json<ReviewBody>,
) -> AppResult<Json<Value>> {
    let admin = require_admin(&db_pool, &session).await?;

    let status = match verdict {
        Verdict::Approve => VerificationStatus::Verified,
        Verdict::Reject => VerificationStatus::Rejected,
    };
    let changed = sqlx::query(
        "UPDATE profiles SET verification_status=? WHERE id=? AND verification_status='pending'",
    )
    .bind(status.as_str())
    .bind(user_id.to_string())
    .execute(&db_pool)
    .await?
    .rows_affected();

    if changed == 0 {
        return Err(AppError::not_found("no pending verification for that user"));
    }

    tracing::info!(%admin, %user_id, %status, "verification reviewed");
    Ok(Json(json!({ "verification_status": status })))
}
