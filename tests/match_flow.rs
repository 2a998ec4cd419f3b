//! End-to-end lounge flow: two users with overlapping interests search,
//! land in one shared room with a greeting naming the overlap, then one
//! skips and the other sees it.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::time::timeout;
use uuid::Uuid;
use vibelounge::chats::msg;
use vibelounge::events::{self, Event, Notifier};
use vibelounge::matching::search::{run_search, SearchOutcome};
use vibelounge::{auth, db, profiles, MatchConfig, SearchRegistry};

async fn lounge_user(pool: &SqlitePool, name: &str, interests: &[&str]) -> Uuid {
    let id = auth::create_profile(pool, name).await.unwrap();
    sqlx::query("UPDATE profiles SET verification_status='verified', match_status='online' WHERE id=?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .unwrap();
    let tags: Vec<String> = interests.iter().map(|s| s.to_string()).collect();
    profiles::save_interests(pool, id, &tags).await.unwrap();
    id
}

#[tokio::test]
async fn two_strangers_meet_chat_and_part() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init(&pool).await.unwrap();

    let notifier = Arc::new(Notifier::default());
    let registry = SearchRegistry::default();
    let cfg = MatchConfig { poll_interval: Duration::from_millis(5), max_attempts: 200 };

    let u1 = lounge_user(&pool, "U1", &["tech"]).await;
    let u2 = lounge_user(&pool, "U2", &["tech", "art"]).await;

    let mut tasks = Vec::new();
    for (user, interests) in [(u1, vec!["tech".to_string()]), (u2, vec!["tech".to_string(), "art".to_string()])] {
        let pool = pool.clone();
        let notifier = notifier.clone();
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            run_search(&pool, &notifier, &registry, user, &interests, cfg).await.unwrap()
        }));
    }

    let mut rooms = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            SearchOutcome::Matched { conversation_id, shared_interest, .. } => {
                assert_eq!(shared_interest.as_deref(), Some("tech"));
                rooms.push(conversation_id);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }
    assert_eq!(rooms[0], rooms[1]);
    let room = rooms[0];

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let (greeting,): (String,) = sqlx::query_as(
        "SELECT content FROM messages WHERE conversation_id=? AND sender_id IS NULL",
    )
    .bind(room.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(greeting, "::sys:matched:tech");

    // a little small talk
    msg::send_msg(&pool, &notifier, room, u1, "hey!").await.unwrap();
    msg::send_msg(&pool, &notifier, room, u2, "hi :)").await.unwrap();

    // U2 listens on the session channel; U1 skips
    let mut u2_rx = notifier.subscribe(&events::conv_topic(room));
    msg::skip(&pool, &notifier, room, u1).await.unwrap();

    let first = timeout(Duration::from_secs(1), u2_rx.recv()).await.unwrap().unwrap();
    match first {
        Event::Message { content, sender_id, .. } => {
            assert_eq!(content, msg::SKIP_CONTROL);
            assert_eq!(sender_id, Some(u1));
        }
        other => panic!("expected the skip control message, got {other:?}"),
    }
    let second = timeout(Duration::from_secs(1), u2_rx.recv()).await.unwrap().unwrap();
    match second {
        Event::Skipped { by, conversation_id } => {
            assert_eq!(by, u1);
            assert_eq!(conversation_id, room);
        }
        other => panic!("expected the skipped event, got {other:?}"),
    }

    // the room is over for both sides
    let err = msg::send_msg(&pool, &notifier, room, u2, "wait").await.unwrap_err();
    assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
    assert!(msg::is_ended(&pool, room).await.unwrap());
}
