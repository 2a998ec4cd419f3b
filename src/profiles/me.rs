use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{db::MatchStatus, session, AppError, AppResult, AppState};

#[derive(Serialize)]
pub(crate) struct ProfileView {
    id: String,
    display_name: String,
    avatar_url: Option<String>,
    gender_identity: Option<String>,
    dob: Option<String>,
    verification_status: String,
    match_status: String,
    is_premium: bool,
    interests: Vec<String>,
    /// name + at least one interest + gender + dob, the lounge entry bar
    onboarded: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<ProfileView>> {
    let user_id = session::current_user(&session).await?;

    let row: Option<(String, Option<String>, Option<String>, Option<String>, String, String, bool)> =
        sqlx::query_as(
            "SELECT display_name,avatar_url,gender_identity,dob,verification_status,match_status,is_premium
             FROM profiles WHERE id=?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&db_pool)
        .await?;
    let Some((display_name, avatar_url, gender_identity, dob, verification_status, match_status, is_premium)) = row
    else {
        return Err(AppError::not_found("profile"));
    };

    let interests = super::interests(&db_pool, user_id).await?;
    let onboarded = !display_name.is_empty()
        && !interests.is_empty()
        && gender_identity.is_some()
        && dob.is_some();

    Ok(Json(ProfileView {
        id: user_id.to_string(),
        display_name,
        avatar_url,
        gender_identity,
        dob,
        verification_status,
        match_status,
        is_premium,
        interests,
        onboarded,
    }))
}

#[derive(Deserialize)]
pub(crate) struct UpdateBody {
    display_name: Option<String>,
    avatar_url: Option<String>,
    gender_identity: Option<String>,
    dob: Option<String>,
    interests: Option<Vec<String>>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn update(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<UpdateBody>,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;

    if let Some(name) = &body.display_name {
        if name.trim().is_empty() {
            return Err(AppError::bad_request("display name can't be empty"));
        }
        sqlx::query("UPDATE profiles SET display_name=? WHERE id=?")
            .bind(name.trim())
            .bind(user_id.to_string())
            .execute(&db_pool)
            .await?;
    }
    if let Some(avatar_url) = &body.avatar_url {
        sqlx::query("UPDATE profiles SET avatar_url=? WHERE id=?")
            .bind(avatar_url)
            .bind(user_id.to_string())
            .execute(&db_pool)
            .await?;
    }
    if let Some(gender_identity) = &body.gender_identity {
        sqlx::query("UPDATE profiles SET gender_identity=? WHERE id=?")
            .bind(gender_identity)
            .bind(user_id.to_string())
            .execute(&db_pool)
            .await?;
    }
    if let Some(dob) = &body.dob {
        sqlx::query("UPDATE profiles SET dob=? WHERE id=?")
            .bind(dob)
            .bind(user_id.to_string())
            .execute(&db_pool)
            .await?;
    }
    if let Some(interests) = &body.interests {
        super::save_interests(&db_pool, user_id, interests).await?;
    }

    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub(crate) struct PresenceBody {
    status: MatchStatus,
}

// online/offline only; `busy` belongs to the matching protocol while a
// conversation is live
#[debug_handler(state = AppState)]
pub(crate) async fn presence(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(PresenceBody { status }): Json<PresenceBody>,
) -> AppResult<Json<Value>> {
    let user_id = session::current_user(&session).await?;

    if !matches!(status, MatchStatus::Online | MatchStatus::Offline) {
        return Err(AppError::bad_request("presence is online or offline"));
    }

    let changed = sqlx::query("UPDATE profiles SET match_status=? WHERE id=? AND match_status<>'busy'")
        .bind(status.as_str())
        .bind(user_id.to_string())
        .execute(&db_pool)
        .await?
        .rows_affected();

    Ok(Json(json!({ "updated": changed == 1 })))
}
