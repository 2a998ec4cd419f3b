mod login;
mod logout;

use axum::{routing::post, Router};
use rand::seq::IndexedRandom;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
}

pub(crate) fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];

    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    format!(
        "{} {}",
        adjectives.choose(&mut rand::rng()).unwrap(),
        nouns.choose(&mut rand::rng()).unwrap()
    )
}

pub async fn create_profile(db_pool: &SqlitePool, display_name: &str) -> AppResult<Uuid> {
    let id = Uuid::now_v7();
    tracing::info!(%id, display_name, "creating profile");
    sqlx::query("INSERT INTO profiles (id,display_name,created_at) VALUES (?,?,?)")
        .bind(id.to_string())
        .bind(display_name)
        .bind(db::now_ms())
        .execute(db_pool)
        .await?;
    Ok(id)
}
