use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{session::USER_ID, AppError, AppResult, AppState};

// a returning user presents their id, a fresh one gets a profile
#[derive(Deserialize)]
pub(crate) struct LoginBody {
    pub(crate) user_id: Option<Uuid>,
    pub(crate) display_name: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(LoginBody { user_id, display_name }): Json<LoginBody>,
) -> AppResult<Json<Value>> {
    let user_id = match user_id {
        Some(id) => {
            let known: Option<(String,)> = sqlx::query_as("SELECT id FROM profiles WHERE id=?")
                .bind(id.to_string())
                .fetch_optional(&db_pool)
                .await?;
            if known.is_none() {
                return Err(AppError::not_found("unknown user"));
            }
            id
        }
        None => {
            let name = display_name.unwrap_or_else(super::random_alias);
            super::create_profile(&db_pool, &name).await?
        }
    };

    session.insert(USER_ID, user_id.to_string()).await?;
    sqlx::query("UPDATE profiles SET match_status='online' WHERE id=? AND match_status='offline'")
        .bind(user_id.to_string())
        .execute(&db_pool)
        .await?;

    tracing::info!(%user_id, "logged in");
    Ok(Json(json!({ "user_id": user_id })))
}
