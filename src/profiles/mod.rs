mod me;
mod verify;

use axum::{routing::{get, post}, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me::me).post(me::update))
        .route("/presence", post(me::presence))
        .route("/verify", post(verify::submit))
}

pub const FREE_INTEREST_CAP: usize = 3;

/// Replaces the user's interest tags. Free tier stops at three; premium
/// lifts the cap (the upgrade path is external billing, out of scope here).
pub async fn save_interests(
    db_pool: &SqlitePool,
    user_id: Uuid,
    tags: &[String],
) -> AppResult<Vec<String>> {
    let mut clean: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || clean.iter().any(|t| t == tag) {
            continue;
        }
        clean.push(tag.to_owned());
    }

    if clean.len() > FREE_INTEREST_CAP {
        let (is_premium,): (bool,) = sqlx::query_as("SELECT is_premium FROM profiles WHERE id=?")
            .bind(user_id.to_string())
            .fetch_one(db_pool)
            .await?;
        if !is_premium {
            return Err(AppError::bad_request("free tier is limited to 3 interests"));
        }
    }

    sqlx::query("DELETE FROM profile_interests WHERE profile_id=?")
        .bind(user_id.to_string())
        .execute(db_pool)
        .await?;
    for tag in &clean {
        sqlx::query("INSERT INTO profile_interests (profile_id,tag) VALUES (?,?)")
            .bind(user_id.to_string())
            .bind(tag)
            .execute(db_pool)
            .await?;
    }

    Ok(clean)
}

pub async fn interests(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT tag FROM profile_interests WHERE profile_id=? ORDER BY tag")
            .bind(user_id.to_string())
            .fetch_all(db_pool)
            .await?;
    Ok(rows.into_iter().map(|(t,)| t).collect())
}

#[cfg(test)]
mod tests {
    use crate::db::testutil;

    use super::*;

    #[tokio::test]
    async fn free_tier_caps_interests_at_three() {
        let pool = testutil::pool().await;
        let user = testutil::seed_user(&pool, "U", &[]).await;

        let tags: Vec<String> = ["tech", "art", "music", "books"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = save_interests(&pool, user, &tags).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);

        let saved = save_interests(&pool, user, &tags[..3].to_vec()).await.unwrap();
        assert_eq!(saved.len(), 3);
    }

    #[tokio::test]
    async fn premium_lifts_the_cap_and_tags_are_deduped() {
        let pool = testutil::pool().await;
        let user = testutil::seed_user(&pool, "U", &[]).await;
        sqlx::query("UPDATE profiles SET is_premium=1 WHERE id=?")
            .bind(user.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let tags: Vec<String> = ["tech", "tech", " art ", "music", "books", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let saved = save_interests(&pool, user, &tags).await.unwrap();
        assert_eq!(saved, vec!["tech", "art", "music", "books"]);
        assert_eq!(interests(&pool, user).await.unwrap().len(), 4);
    }
}
