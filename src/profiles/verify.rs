use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{session, AppError, AppResult, AppState};

#[derive(Deserialize)]
pub(crate) struct VerifyBody {
    /// reference into the external blob store, opaque to us
    image: String,
}

/// Submits the selfie challenge. Status goes to `pending` and stays there
/// until an admin reviews it; a rejected user may resubmit.
#[debug_handler(state = AppState)]
pub(crate) async fn submit(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(VerifyBody { image }): Json<VerifyBody>,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;

    if image.trim().is_empty() {
        return Err(AppError::bad_request("missing verification image"));
    }

    let changed = sqlx::query(
        "UPDATE profiles SET verification_status='pending', verification_image=?
         WHERE id=? AND verification_status IN ('unverified','rejected')",
    )
    .bind(image.trim())
    .bind(user_id.to_string())
    .execute(&db_pool)
    .await?
    .rows_affected();

    if changed == 0 {
        return Err(AppError::conflict("verification already submitted or decided"));
    }

    tracing::info!(%user_id, "verification submitted");
    Ok(Json(json!({ "verification_status": "pending" })))
}
