use axum::{debug_handler, extract::State};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{session, AppResult, AppState, SearchRegistry};

// any in-flight search dies with the session
#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    State(db_pool): State<SqlitePool>,
    State(searches): State<SearchRegistry>,
    session: Session,
) -> AppResult<()> {
    if let Ok(user_id) = session::current_user(&session).await {
        searches.cancel(user_id);
        sqlx::query("UPDATE profiles SET match_status='offline' WHERE id=?")
            .bind(user_id.to_string())
            .execute(&db_pool)
            .await?;
    }
    session.clear().await;
    Ok(())
}
