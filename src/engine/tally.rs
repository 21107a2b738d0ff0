//! Weight recomputation and result aggregation for one proposal.
//!
//! Always runs on the caller's transaction connection: the reload of every
//! vote, the weight rewrites, and the result upsert commit or roll back as
//! one unit, so readers never observe a tally mixing old and new weights.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Statement,
};

use crate::entities::{delegation, vote, voting_result};
use crate::error::EngineError;
use crate::engine::graph::{DelegationEdge, GraphSnapshot};

/// Weighted yes/no sums for one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub in_favor: i64,
    pub against: i64,
}

/// Sums already-weighted votes. Pure so the aggregation rule is testable
/// without a database.
pub fn weighted_tally<I>(votes: I) -> Tally
where
    I: IntoIterator<Item = (bool, i64)>,
{
    let mut tally = Tally::default();
    for (in_favor, weight) in votes {
        assert!(weight >= 1, "Persisted vote weight below one");
        if in_favor {
            tally.in_favor += weight;
        } else {
            tally.against += weight;
        }
    }
    tally
}

/// Reloads every vote on the proposal, recomputes each weight from the
/// current delegation graph, and upserts the VotingResult row. Returns the
/// fresh result.
///
/// Serialization: two concurrent writers each insert a vote row the other
/// cannot see or row-lock under read committed, so `FOR UPDATE` on the
/// vote rows is not enough. A transaction-scoped advisory lock on the
/// topic is taken first; the later writer blocks here until the earlier
/// one commits, and its subsequent reads then see every committed vote.
pub async fn recalculate_result<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    proposal_url: &str,
) -> Result<voting_result::Model, EngineError> {
    lock_topic(conn, organization_id, proposal_url).await?;

    let votes = vote::Entity::find()
        .filter(vote::Column::OrganizationId.eq(organization_id))
        .filter(vote::Column::ProposalUrl.eq(proposal_url))
        .all(conn)
        .await?;

    let delegations = delegation::Entity::find()
        .filter(delegation::Column::OrganizationId.eq(organization_id))
        .filter(
            delegation::Column::ProposalUrl
                .eq(proposal_url)
                .or(delegation::Column::ProposalUrl.is_null()),
        )
        .all(conn)
        .await?;

    let edges: Vec<DelegationEdge> = delegations
        .iter()
        .map(|d| DelegationEdge {
            delegator_id: d.delegator_id,
            delegate_id: d.delegate_id,
            proposal_url: d.proposal_url.clone(),
        })
        .collect();
    let direct_voters: Vec<i64> = votes.iter().map(|v| v.participant_id).collect();
    let snapshot = GraphSnapshot::for_proposal(proposal_url, &edges, direct_voters);

    let mut weighted = Vec::with_capacity(votes.len());
    for vote_row in votes {
        let weight = snapshot.vote_weight(vote_row.participant_id);
        weighted.push((vote_row.in_favor, weight));

        if vote_row.weight != weight {
            let mut active: vote::ActiveModel = vote_row.into();
            active.weight = Set(weight);
            active.updated_at = Set(Utc::now().into());
            active.update(conn).await?;
        }
    }

    let tally = weighted_tally(weighted);
    let result = voting_result::ActiveModel {
        organization_id: Set(organization_id.to_owned()),
        proposal_url: Set(proposal_url.to_owned()),
        in_favor: Set(tally.in_favor),
        against: Set(tally.against),
        updated_at: Set(Utc::now().into()),
    };

    voting_result::Entity::insert(result)
        .on_conflict(
            OnConflict::columns([
                voting_result::Column::OrganizationId,
                voting_result::Column::ProposalUrl,
            ])
            .update_columns([
                voting_result::Column::InFavor,
                voting_result::Column::Against,
                voting_result::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec(conn)
        .await?;

    let stored = voting_result::Entity::find_by_id((
        organization_id.to_owned(),
        proposal_url.to_owned(),
    ))
    .one(conn)
    .await?
    .ok_or_else(|| EngineError::NotFound("voting result missing after upsert".to_string()))?;

    assert!(stored.in_favor >= 0, "In-favor tally cannot be negative");
    assert!(stored.against >= 0, "Against tally cannot be negative");
    Ok(stored)
}

/// Takes `pg_advisory_xact_lock` on the topic key; released automatically
/// at commit or rollback.
async fn lock_topic<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    proposal_url: &str,
) -> Result<(), EngineError> {
    let key = topic_lock_key(organization_id, proposal_url);
    let statement = Statement::from_sql_and_values(
        conn.get_database_backend(),
        "SELECT pg_advisory_xact_lock($1)",
        [key.into()],
    );
    conn.execute(statement).await?;
    Ok(())
}

/// FNV-1a over "org\nproposal_url", folded to the signed 64-bit key space
/// advisory locks use. Deterministic across processes; the newline keeps
/// ("ab", "c") and ("a", "bc") apart.
fn topic_lock_key(organization_id: &str, proposal_url: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in organization_id
        .as_bytes()
        .iter()
        .chain(b"\n")
        .chain(proposal_url.as_bytes())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_weights_by_choice() {
        let tally = weighted_tally([(true, 3), (false, 1), (true, 2)]);
        assert_eq!(tally, Tally { in_favor: 5, against: 1 });
    }

    #[test]
    fn empty_proposal_tallies_to_zero() {
        let tally = weighted_tally([]);
        assert_eq!(tally, Tally::default());
    }

    #[test]
    fn summing_twice_is_identical() {
        let votes = [(true, 2), (false, 4)];
        assert_eq!(weighted_tally(votes), weighted_tally(votes));
    }

    #[test]
    fn topic_lock_key_is_stable_and_distinguishes_topics() {
        let key = topic_lock_key("acme", "https://proposals.example/1");
        assert_eq!(key, topic_lock_key("acme", "https://proposals.example/1"));
        assert_ne!(key, topic_lock_key("acme", "https://proposals.example/2"));
        assert_ne!(key, topic_lock_key("other", "https://proposals.example/1"));
        // Concatenation ambiguity must not collide two distinct topics.
        assert_ne!(topic_lock_key("ab", "c"), topic_lock_key("a", "bc"));
    }

    #[test]
    fn deleting_the_last_vote_tallies_to_zero() {
        use crate::engine::graph::GraphSnapshot;

        // B delegates globally to A, C delegates to B for the proposal,
        // A votes in favor: tally is {3, 0}.
        let edges = vec![
            crate::engine::graph::DelegationEdge {
                delegator_id: 2,
                delegate_id: 1,
                proposal_url: None,
            },
            crate::engine::graph::DelegationEdge {
                delegator_id: 3,
                delegate_id: 2,
                proposal_url: Some("https://proposals.example/1".to_string()),
            },
        ];
        let snapshot = GraphSnapshot::for_proposal("https://proposals.example/1", &edges, [1]);
        let before = weighted_tally([(true, snapshot.vote_weight(1))]);
        assert_eq!(before, Tally { in_favor: 3, against: 0 });

        // Removing A's vote leaves no direct votes at all; the recompute
        // still produces (and persists) an explicit zero tally, with B
        // and C still delegated.
        let after = weighted_tally([]);
        assert_eq!(after, Tally { in_favor: 0, against: 0 });
    }
}
