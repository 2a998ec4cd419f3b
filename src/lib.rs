pub mod admin;
pub mod auth;
pub mod chats;
pub mod db;
pub mod events;
pub mod friends;
pub mod matching;
pub mod profiles;
pub mod session;

mod appresult;

pub use appresult::{AppError, AppResult};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::FromRef;
use sqlx::SqlitePool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::events::Notifier;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub notifier: Arc<Notifier>,
    pub searches: SearchRegistry,
    pub match_config: MatchConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct MatchConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl MatchConfig {
    pub fn from_env() -> Self {
        let poll_ms = dotenv::var("MATCH_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        let max_attempts = dotenv::var("MATCH_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);
        Self { poll_interval: Duration::from_millis(poll_ms), max_attempts }
    }
}

/// Why a running search was told to stop. A superseded search must not touch
/// the status row on its way out: the newer search owns it already.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchStop {
    Run,
    Cancelled,
    Superseded,
}

/// One cancellation handle per user with a search in flight. Starting a new
/// search supersedes the previous one before registering itself, so a user
/// can never run two overlapping poll loops.
#[derive(Clone, Default)]
pub struct SearchRegistry(Arc<Mutex<HashMap<Uuid, (Uuid, watch::Sender<SearchStop>)>>>);

pub struct SearchTicket {
    pub token: Uuid,
    pub cancel: watch::Receiver<SearchStop>,
}

impl SearchRegistry {
    pub fn begin(&self, user_id: Uuid) -> SearchTicket {
        let token = Uuid::now_v7();
        let (tx, rx) = watch::channel(SearchStop::Run);
        let old = self.0.lock().unwrap().insert(user_id, (token, tx));
        if let Some((_, old_tx)) = old {
            let _ = old_tx.send(SearchStop::Superseded);
        }
        SearchTicket { token, cancel: rx }
    }

    pub fn cancel(&self, user_id: Uuid) -> bool {
        match self.0.lock().unwrap().remove(&user_id) {
            Some((_, tx)) => tx.send(SearchStop::Cancelled).is_ok(),
            None => false,
        }
    }

    /// Removes the entry only if it still belongs to this search; a newer
    /// search for the same user keeps its own handle.
    pub fn finish(&self, user_id: Uuid, token: Uuid) {
        let mut map = self.0.lock().unwrap();
        if map.get(&user_id).is_some_and(|(t, _)| *t == token) {
            map.remove(&user_id);
        }
    }
}
