use sqlx::SqlitePool;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::chats::msg;
use crate::events::{self, Event, Notifier};
use crate::{db, AppResult, MatchConfig, SearchRegistry, SearchStop};

use super::{factory, finder};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    Matched {
        conversation_id: Uuid,
        partner_id: Uuid,
        shared_interest: Option<String>,
    },
    TimedOut,
    Cancelled,
}

/// One search session: flips the user to `searching`, then polls `find_match`
/// per tick while also listening for someone else's claim to land as a
/// `Matched` event. Whichever path resolves first wins; the registry's watch
/// channel stops the session from outside.
///
/// The subscription opens before the status flip: there is no window where
/// we are claimable but deaf.
pub async fn run_search(
    pool: &SqlitePool,
    notifier: &Notifier,
    registry: &SearchRegistry,
    self_id: Uuid,
    interests: &[String],
    cfg: MatchConfig,
) -> AppResult<SearchOutcome> {
    let ticket = registry.begin(self_id);
    let matched_rx = notifier.subscribe(&events::user_topic(self_id));

    let since = db::now_ms();
    sqlx::query("UPDATE profiles SET match_status='searching', searching_since=? WHERE id=?")
        .bind(since)
        .bind(self_id.to_string())
        .execute(pool)
        .await?;

    let outcome =
        search_loop(pool, notifier, self_id, interests, cfg, since, matched_rx, ticket.cancel).await;
    registry.finish(self_id, ticket.token);
    outcome
}

async fn search_loop(
    pool: &SqlitePool,
    notifier: &Notifier,
    self_id: Uuid,
    interests: &[String],
    cfg: MatchConfig,
    since: i64,
    mut matched_rx: broadcast::Receiver<Event>,
    mut cancel: watch::Receiver<SearchStop>,
) -> AppResult<SearchOutcome> {
    let mut ticker = tokio::time::interval(cfg.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            event = matched_rx.recv() => {
                match event {
                    Ok(Event::Matched { conversation_id, partner_id, shared_interest }) => {
                        tracing::debug!(%self_id, %conversation_id, "claimed by a remote search");
                        return Ok(SearchOutcome::Matched { conversation_id, partner_id, shared_interest });
                    }
                    // lagged or unrelated event, keep going
                    _ => {}
                }
            }
            changed = cancel.changed() => {
                // a closed channel counts as cancellation too
                let stop = if changed.is_err() { SearchStop::Cancelled } else { *cancel.borrow() };
                match stop {
                    SearchStop::Run => {}
                    // the newer search has rewritten the status row; hands off
                    SearchStop::Superseded => return Ok(SearchOutcome::Cancelled),
                    SearchStop::Cancelled => {
                        revert_searching(pool, self_id, since).await?;
                        return Ok(SearchOutcome::Cancelled);
                    }
                }
            }
            _ = ticker.tick() => {
                if attempts >= cfg.max_attempts {
                    break;
                }
                attempts += 1;
                if let Some(claim) = finder::find_match(pool, self_id, interests).await? {
                    let (conversation_id, _) = factory::get_or_create_conversation(
                        pool, notifier, self_id, claim.partner_id, claim.shared_interest.as_deref(),
                    ).await?;
                    return Ok(SearchOutcome::Matched {
                        conversation_id,
                        partner_id: claim.partner_id,
                        shared_interest: claim.shared_interest,
                    });
                }
            }
        }
    }

    // exhausted. reverting only succeeds if nobody claimed us at the wire;
    // a failed revert means a match is landing, so give the event one more
    // interval and fall back to the durable participant row.
    if revert_searching(pool, self_id, since).await? {
        tracing::debug!(%self_id, attempts, "search exhausted");
        return Ok(SearchOutcome::TimedOut);
    }

    if let Ok(Ok(Event::Matched { conversation_id, partner_id, shared_interest })) =
        tokio::time::timeout(cfg.poll_interval, matched_rx.recv()).await
    {
        return Ok(SearchOutcome::Matched { conversation_id, partner_id, shared_interest });
    }
    if let Some(outcome) = adopt_latest_match(pool, self_id).await? {
        return Ok(outcome);
    }
    // claim evaporated without a room (claimer crashed mid-pair); go idle
    sqlx::query("UPDATE profiles SET match_status='online' WHERE id=? AND match_status='busy'")
        .bind(self_id.to_string())
        .execute(pool)
        .await?;
    Ok(SearchOutcome::TimedOut)
}

/// True if we were still `searching` and are now idle again. The
/// `searching_since` guard keeps a stopping session from reverting a row a
/// newer session has taken over.
async fn revert_searching(pool: &SqlitePool, self_id: Uuid, since: i64) -> AppResult<bool> {
    let changed = sqlx::query(
        "UPDATE profiles SET match_status='online'
         WHERE id=? AND match_status='searching' AND searching_since=?",
    )
    .bind(self_id.to_string())
    .bind(since)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(changed == 1)
}

/// The participant row is the authoritative matched signal; when the live
/// event was missed, the freshest live room we are in is the match.
async fn adopt_latest_match(pool: &SqlitePool, self_id: Uuid) -> AppResult<Option<SearchOutcome>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT pt.conversation_id, other.user_id
         FROM participants pt
         JOIN participants other ON other.conversation_id=pt.conversation_id
                                AND other.user_id<>pt.user_id
         JOIN conversations c ON c.id=pt.conversation_id AND c.pair_key IS NOT NULL
         WHERE pt.user_id=?
         ORDER BY pt.joined_at DESC, pt.conversation_id DESC
         LIMIT 1",
    )
    .bind(self_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some((conversation_id, partner_id)) = row else {
        return Ok(None);
    };
    let conversation_id = Uuid::parse_str(&conversation_id)?;
    let shared_interest = msg::greeting_interest(pool, conversation_id).await?;
    Ok(Some(SearchOutcome::Matched {
        conversation_id,
        partner_id: Uuid::parse_str(&partner_id)?,
        shared_interest,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::db::testutil;
    use crate::events::Notifier;

    use super::*;

    fn cfg(poll_ms: u64, max_attempts: u32) -> MatchConfig {
        MatchConfig { poll_interval: Duration::from_millis(poll_ms), max_attempts }
    }

    fn tags(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn exhaustion_reverts_status_and_creates_nothing() {
        let pool = testutil::pool().await;
        let notifier = Notifier::default();
        let registry = SearchRegistry::default();
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;

        let outcome =
            run_search(&pool, &notifier, &registry, me, &tags(&["tech"]), cfg(5, 3)).await.unwrap();
        assert_eq!(outcome, SearchOutcome::TimedOut);
        assert_eq!(testutil::match_status(&pool, me).await, "online");

        let (rooms,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rooms, 0);
    }

    #[tokio::test]
    async fn two_searchers_converge_on_one_room() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();
        let u1 = testutil::seed_user(&pool, "u1", &["tech"]).await;
        let u2 = testutil::seed_user(&pool, "u2", &["tech", "art"]).await;

        let mut tasks = Vec::new();
        for (user, interests) in [(u1, tags(&["tech"])), (u2, tags(&["tech", "art"]))] {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, user, &interests, cfg(5, 100))
                    .await
                    .unwrap()
            }));
        }

        let mut rooms = HashSet::new();
        for task in tasks {
            match task.await.unwrap() {
                SearchOutcome::Matched { conversation_id, shared_interest, .. } => {
                    assert_eq!(shared_interest.as_deref(), Some("tech"));
                    rooms.insert(conversation_id);
                }
                other => panic!("expected a match, got {other:?}"),
            }
        }
        assert_eq!(rooms.len(), 1);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    /// At-most-one-claim: N concurrent searchers with one shared tag end up
    /// in exactly N/2 rooms and nobody sits in two of them.
    #[tokio::test]
    async fn concurrent_lounge_pairs_everyone_exactly_once() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();

        let mut users = Vec::new();
        for i in 0..6 {
            users.push(testutil::seed_user(&pool, &format!("u{i}"), &["tech"]).await);
        }

        let mut tasks = Vec::new();
        for &user in &users {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                (user, run_search(&pool, &notifier, &registry, user, &tags(&["tech"]), cfg(5, 200)).await.unwrap())
            }));
        }

        let mut room_of: HashMap<Uuid, Uuid> = HashMap::new();
        for task in tasks {
            let (user, outcome) = task.await.unwrap();
            match outcome {
                SearchOutcome::Matched { conversation_id, .. } => {
                    assert!(room_of.insert(user, conversation_id).is_none());
                }
                other => panic!("user {user} got {other:?}"),
            }
        }

        let rooms: HashSet<_> = room_of.values().collect();
        assert_eq!(rooms.len(), 3);

        for user in users {
            let (memberships,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM participants WHERE user_id=?")
                    .bind(user.to_string())
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(memberships, 1, "user {user} is in {memberships} rooms");
            assert_eq!(testutil::match_status(&pool, user).await, "busy");
        }
    }

    #[tokio::test]
    async fn passive_side_adopts_the_claimers_room() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();
        let a = testutil::seed_user(&pool, "a", &["tech"]).await;
        let b = testutil::seed_user(&pool, "b", &["tech"]).await;

        // A searches alone first, with a poll interval so long that within
        // this test only the passive path can resolve it
        let a_task = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, a, &tags(&["tech"]), cfg(60_000, 100)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let claim = finder::find_match(&pool, b, &tags(&["tech"])).await.unwrap();
        // B was not searching, so B claims A one-sidedly only after going
        // searchable itself
        assert!(claim.is_none());
        testutil::set_searching(&pool, b).await;
        let claim = finder::find_match(&pool, b, &tags(&["tech"])).await.unwrap().unwrap();
        assert_eq!(claim.partner_id, a);
        let (room, _) = factory::get_or_create_conversation(
            &pool, &notifier, b, a, claim.shared_interest.as_deref(),
        )
        .await
        .unwrap();

        match a_task.await.unwrap() {
            SearchOutcome::Matched { conversation_id, partner_id, .. } => {
                assert_eq!(conversation_id, room);
                assert_eq!(partner_id, b);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn restarting_a_search_stays_claimable() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();
        let a = testutil::seed_user(&pool, "a", &["tech"]).await;
        let b = testutil::seed_user(&pool, "b", &["tech"]).await;

        // idle first search; its teardown must not knock the restart out of
        // the searching pool
        let first = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, a, &tags(&["tech"]), cfg(60_000, 100)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        testutil::set_searching(&pool, b).await;

        let second = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, a, &tags(&["tech"]), cfg(5, 200)).await.unwrap()
            })
        };

        assert_eq!(first.await.unwrap(), SearchOutcome::Cancelled);
        match second.await.unwrap() {
            SearchOutcome::Matched { partner_id, .. } => assert_eq!(partner_id, b),
            other => panic!("restarted search got {other:?}"),
        }
        assert_eq!(testutil::match_status(&pool, a).await, "busy");
        assert_eq!(testutil::match_status(&pool, b).await, "busy");
    }

    #[tokio::test]
    async fn a_new_search_cancels_the_old_one() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;

        let first = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, me, &tags(&["tech"]), cfg(10, 1000)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, me, &tags(&["tech"]), cfg(5, 2)).await.unwrap()
            })
        };

        assert_eq!(first.await.unwrap(), SearchOutcome::Cancelled);
        assert_eq!(second.await.unwrap(), SearchOutcome::TimedOut);
        assert_eq!(testutil::match_status(&pool, me).await, "online");
    }

    #[tokio::test]
    async fn explicit_cancel_stops_the_loop() {
        let pool = testutil::pool().await;
        let notifier = Arc::new(Notifier::default());
        let registry = SearchRegistry::default();
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;

        let task = {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                run_search(&pool, &notifier, &registry, me, &tags(&["tech"]), cfg(10, 1000)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.cancel(me));

        assert_eq!(task.await.unwrap(), SearchOutcome::Cancelled);
        assert_eq!(testutil::match_status(&pool, me).await, "online");
    }
}
