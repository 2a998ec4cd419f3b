use sqlx::SqlitePool;
use uuid::Uuid;

use crate::AppResult;

pub struct Claim {
    pub partner_id: Uuid,
    pub shared_interest: Option<String>,
}

/// Claims one searching candidate for `self_id`, first-committer-wins.
/// Pick and claim are one conditional UPDATE; candidates sharing a tag come
/// first, then the longest-waiting one. `Ok(None)` means no candidate, or we
/// were ourselves claimed mid-poll and backed out.
pub async fn find_match(
    pool: &SqlitePool,
    self_id: Uuid,
    interests: &[String],
) -> AppResult<Option<Claim>> {
    let tags = padded_tags(interests);

    let claimed: Option<(String,)> = sqlx::query_as(
        "UPDATE profiles SET match_status='busy'
         WHERE id=(
             SELECT p.id FROM profiles p
             WHERE p.match_status='searching' AND p.id<>?1
             ORDER BY EXISTS(
                 SELECT 1 FROM profile_interests pi
                 WHERE pi.profile_id=p.id AND pi.tag IN (?2,?3,?4)
             ) DESC, p.searching_since ASC, p.id ASC
             LIMIT 1
         ) AND match_status='searching'
         RETURNING id",
    )
    .bind(self_id.to_string())
    .bind(&tags[0])
    .bind(&tags[1])
    .bind(&tags[2])
    .fetch_optional(pool)
    .await?;

    let Some((partner_id,)) = claimed else {
        return Ok(None);
    };
    let partner_id = Uuid::parse_str(&partner_id)?;

    // claim self too; if someone else claimed us between our poll and now,
    // back out and release the candidate
    let self_claim =
        sqlx::query("UPDATE profiles SET match_status='busy' WHERE id=? AND match_status='searching'")
            .bind(self_id.to_string())
            .execute(pool)
            .await?;

    if self_claim.rows_affected() == 0 {
        sqlx::query("UPDATE profiles SET match_status='searching' WHERE id=? AND match_status='busy'")
            .bind(partner_id.to_string())
            .execute(pool)
            .await?;
        tracing::debug!(%self_id, %partner_id, "claim lost, candidate released");
        return Ok(None);
    }

    let shared: Option<(String,)> = sqlx::query_as(
        "SELECT tag FROM profile_interests WHERE profile_id=? AND tag IN (?,?,?) ORDER BY tag LIMIT 1",
    )
    .bind(partner_id.to_string())
    .bind(&tags[0])
    .bind(&tags[1])
    .bind(&tags[2])
    .fetch_optional(pool)
    .await?;

    Ok(Some(Claim { partner_id, shared_interest: shared.map(|(t,)| t) }))
}

fn padded_tags(interests: &[String]) -> [String; 3] {
    let mut tags = [String::new(), String::new(), String::new()];
    for (slot, tag) in tags.iter_mut().zip(interests) {
        *slot = tag.clone();
    }
    tags
}

#[cfg(test)]
mod tests {
    use crate::db::testutil;

    use super::*;

    fn tags(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn prefers_shared_interest_over_longer_wait() {
        let pool = testutil::pool().await;
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;
        let old = testutil::seed_user(&pool, "old", &["art"]).await;
        let techie = testutil::seed_user(&pool, "techie", &["tech", "art"]).await;
        testutil::set_searching(&pool, old).await;
        testutil::set_searching(&pool, techie).await;
        testutil::set_searching(&pool, me).await;

        let claim = find_match(&pool, me, &tags(&["tech"])).await.unwrap().unwrap();
        assert_eq!(claim.partner_id, techie);
        assert_eq!(claim.shared_interest.as_deref(), Some("tech"));
        assert_eq!(testutil::match_status(&pool, me).await, "busy");
        assert_eq!(testutil::match_status(&pool, techie).await, "busy");
        assert_eq!(testutil::match_status(&pool, old).await, "searching");
    }

    #[tokio::test]
    async fn falls_back_to_any_searching_candidate() {
        let pool = testutil::pool().await;
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;
        let other = testutil::seed_user(&pool, "other", &["astrology"]).await;
        testutil::set_searching(&pool, other).await;
        testutil::set_searching(&pool, me).await;

        let claim = find_match(&pool, me, &tags(&["tech"])).await.unwrap().unwrap();
        assert_eq!(claim.partner_id, other);
        assert_eq!(claim.shared_interest, None);
    }

    #[tokio::test]
    async fn no_candidate_is_not_an_error() {
        let pool = testutil::pool().await;
        let me = testutil::seed_user(&pool, "me", &["tech"]).await;
        testutil::set_searching(&pool, me).await;

        assert!(find_match(&pool, me, &tags(&["tech"])).await.unwrap().is_none());
        assert_eq!(testutil::match_status(&pool, me).await, "searching");
    }

    #[tokio::test]
    async fn backs_out_when_self_was_claimed_mid_poll() {
        let pool = testutil::pool().await;
        let me = testutil::seed_user(&pool, "me", &[]).await;
        let other = testutil::seed_user(&pool, "other", &[]).await;
        testutil::set_searching(&pool, other).await;
        // someone claimed us already: we are busy, not searching
        sqlx::query("UPDATE profiles SET match_status='busy' WHERE id=?")
            .bind(me.to_string())
            .execute(&pool)
            .await
            .unwrap();

        assert!(find_match(&pool, me, &[]).await.unwrap().is_none());
        // the candidate was handed back
        assert_eq!(testutil::match_status(&pool, other).await, "searching");
    }

    #[tokio::test]
    async fn busy_users_are_never_candidates() {
        let pool = testutil::pool().await;
        let me = testutil::seed_user(&pool, "me", &[]).await;
        let taken = testutil::seed_user(&pool, "taken", &[]).await;
        testutil::set_searching(&pool, me).await;
        sqlx::query("UPDATE profiles SET match_status='busy' WHERE id=?")
            .bind(taken.to_string())
            .execute(&pool)
            .await
            .unwrap();

        assert!(find_match(&pool, me, &[]).await.unwrap().is_none());
    }
}
