use std::sync::Arc;

use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::EnvFilter;
use vibelounge::events::Notifier;
use vibelounge::{admin, auth, chats, db, friends, matching, profiles, AppState, MatchConfig, SearchRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(12)));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&dotenv::var("DATABASE_URL").unwrap_or_else(|_| db::DEFAULT_DATABASE_URL.to_owned()))
        .await?;
    db::init(&db_pool).await?;

    let app_state = AppState {
        db_pool,
        notifier: Arc::new(Notifier::default()),
        searches: SearchRegistry::default(),
        match_config: MatchConfig::from_env(),
    };

    let app = Router::new()
        .nest("/auth", auth::router())
        .nest("/p", profiles::router())
        .nest("/m", matching::router())
        .nest("/c", chats::router())
        .nest("/f", friends::router())
        .nest("/admin", admin::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    tracing::info!(%addr, "lounge is open");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
