pub mod factory;
pub mod finder;
pub mod search;

use std::sync::Arc;

use axum::{debug_handler, extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::db::VerificationStatus;
use crate::events::Notifier;
use crate::{profiles, session, AppError, AppResult, AppState, MatchConfig, SearchRegistry};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", post(start_search))
        .route("/cancel", post(cancel_search))
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    interests: Vec<String>,
}

// runs the whole bounded loop and answers with the outcome; response time is
// capped by max_attempts x poll_interval
#[debug_handler(state = AppState)]
async fn start_search(
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Arc<Notifier>>,
    State(searches): State<SearchRegistry>,
    State(match_config): State<MatchConfig>,
    session: Session,
    Json(SearchBody { interests }): Json<SearchBody>,
) -> AppResult<Json<search::SearchOutcome>> {
    let user_id = session::current_user(&session).await?;

    let (status,): (String,) = sqlx::query_as("SELECT verification_status FROM profiles WHERE id=?")
        .bind(user_id.to_string())
        .fetch_one(&db_pool)
        .await?;
    if VerificationStatus::parse(&status) != Some(VerificationStatus::Verified) {
        return Err(AppError::forbidden("only verified profiles can enter the lounge"));
    }

    let interests = profiles::save_interests(&db_pool, user_id, &interests).await?;
    let outcome =
        search::run_search(&db_pool, &notifier, &searches, user_id, &interests, match_config).await?;
    Ok(Json(outcome))
}

#[debug_handler(state = AppState)]
async fn cancel_search(
    State(db_pool): State<SqlitePool>,
    State(searches): State<SearchRegistry>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;
    let entered = crate::db::now_ms();
    let cancelled = searches.cancel(user_id);
    if !cancelled {
        // no live loop left to drop the flag; leave alone any search that
        // registered after this request arrived
        sqlx::query(
            "UPDATE profiles SET match_status='online'
             WHERE id=? AND match_status='searching' AND searching_since<=?",
        )
        .bind(user_id.to_string())
        .bind(entered)
        .execute(&db_pool)
        .await?;
    }
    Ok(Json(json!({ "cancelled": cancelled })))
}
