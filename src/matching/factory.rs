use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chats::msg;
use crate::events::{self, Event, Notifier};
use crate::{db, AppResult};

/// Ordered "lo:hi" uuid pair, the dedupe key for live conversations.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

/// Finds the live conversation for the pair or creates it. Racing creators
/// collide on pair_key and the loser adopts the winner's row. The `Matched`
/// events go out only after the rows are durable; the participant row is the
/// authoritative fact, the event just saves the passive side a poll.
pub async fn get_or_create_conversation(
    pool: &SqlitePool,
    notifier: &Notifier,
    seeker: Uuid,
    partner: Uuid,
    shared_interest: Option<&str>,
) -> AppResult<(Uuid, bool)> {
    let key = pair_key(seeker, partner);
    let fresh_id = Uuid::now_v7();
    let now = db::now_ms();

    let inserted = sqlx::query(
        "INSERT INTO conversations (id,pair_key,created_at,updated_at) VALUES (?,?,?,?)
         ON CONFLICT(pair_key) DO NOTHING",
    )
    .bind(fresh_id.to_string())
    .bind(&key)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected()
        == 1;

    let (conversation_id,): (String,) =
        sqlx::query_as("SELECT id FROM conversations WHERE pair_key=?")
            .bind(&key)
            .fetch_one(pool)
            .await?;
    let conversation_id = Uuid::parse_str(&conversation_id)?;

    if !inserted {
        return Ok((conversation_id, false));
    }

    // seeker's row first: the partner-side row landing second is the event
    // the passively-listening side is waiting on
    for user in [seeker, partner] {
        sqlx::query(
            "INSERT INTO participants (conversation_id,user_id,joined_at) VALUES (?,?,?)
             ON CONFLICT(conversation_id,user_id) DO NOTHING",
        )
        .bind(conversation_id.to_string())
        .bind(user.to_string())
        .bind(db::now_ms())
        .execute(pool)
        .await?;
    }

    msg::insert_system(pool, conversation_id, &msg::matched_greeting(shared_interest)).await?;

    for (me, other) in [(seeker, partner), (partner, seeker)] {
        notifier.publish(
            &events::user_topic(me),
            Event::Matched {
                conversation_id,
                partner_id: other,
                shared_interest: shared_interest.map(str::to_owned),
            },
        );
    }

    tracing::info!(%conversation_id, %seeker, %partner, ?shared_interest, "conversation created");
    Ok((conversation_id, true))
}
