//! The delegation-weighted vote resolution engine.
//!
//! Every write (vote or delegation) runs as one database transaction:
//! validate, mutate the graph, recompute weights and the proposal tally,
//! commit. Notifications go out strictly after commit, so a rolled-back
//! write can never emit an event or leave a partially updated tally.

pub mod graph;
pub mod notify;
pub mod tally;

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Condition;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, ModelTrait, QueryFilter, TransactionTrait,
};
use tracing::info;

use crate::entities::{delegation, participant, vote, voting_result};
use crate::error::EngineError;
use crate::state::ApiCache;
use graph::{DelegationEdge, GraphSnapshot};
use notify::{ResultBus, ResultEvent};

const MAX_ORG_LEN: usize = 128;
const MAX_EMAIL_LEN: usize = 256;
const MAX_PROPOSAL_URL_LEN: usize = 2048;
const MAX_NAME_LEN: usize = 128;

pub const NO_VOTE_TO_DELETE: &str = "no vote found to delete";
pub const NO_DELEGATION_TO_DELETE: &str = "no delegation found to delete";

/// How the transport names a participant: an existing id, or an email to
/// upsert (with an optional display name).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ParticipantRef {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct VotingEngine {
    database: DatabaseConnection,
    notifier: Arc<ResultBus>,
    cache: Arc<ApiCache>,
}

impl VotingEngine {
    pub fn new(
        database: DatabaseConnection,
        notifier: Arc<ResultBus>,
        cache: Arc<ApiCache>,
    ) -> Self {
        Self {
            database,
            notifier,
            cache,
        }
    }

    async fn publish_refreshed(&self, result: voting_result::Model) {
        publish_refreshed(&self.cache, &self.notifier, result).await;
    }

    /// Casts a direct vote. Atomically removes any delegation of the
    /// voter's that applies to this proposal (a vote cancels the prior
    /// delegation), inserts the vote, recomputes every weight on the
    /// proposal and the tally, then publishes after commit.
    pub async fn create_vote(
        &self,
        organization_id: &str,
        voter: &ParticipantRef,
        proposal_url: &str,
        in_favor: bool,
    ) -> Result<vote::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;
        let voter = voter.clone();

        let (stored, result) = self
            .database
            .transaction::<_, (vote::Model, voting_result::Model), EngineError>(move |txn| {
                Box::pin(async move {
                    let participant =
                        resolve_participant(txn, &organization_id, &voter, true).await?;

                    let existing = vote::Entity::find()
                        .filter(vote::Column::OrganizationId.eq(organization_id.as_str()))
                        .filter(vote::Column::ParticipantId.eq(participant.id))
                        .filter(vote::Column::ProposalUrl.eq(proposal_url.as_str()))
                        .one(txn)
                        .await?;
                    if existing.is_some() {
                        return Err(EngineError::Conflict(
                            "participant already voted on this proposal; delete the vote first"
                                .to_string(),
                        ));
                    }

                    // Voting cancels any delegation applicable to this
                    // proposal, global or proposal-specific.
                    delegation::Entity::delete_many()
                        .filter(superseded_delegations(
                            &organization_id,
                            participant.id,
                            &proposal_url,
                        ))
                        .exec(txn)
                        .await?;

                    let now = Utc::now();
                    let inserted = vote::ActiveModel {
                        organization_id: Set(organization_id.clone()),
                        participant_id: Set(participant.id),
                        proposal_url: Set(proposal_url.clone()),
                        in_favor: Set(in_favor),
                        weight: Set(1),
                        created_at: Set(now.into()),
                        updated_at: Set(now.into()),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await?;

                    let result =
                        tally::recalculate_result(txn, &organization_id, &proposal_url).await?;

                    let stored = vote::Entity::find_by_id(inserted.id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            EngineError::NotFound("vote missing after insert".to_string())
                        })?;
                    assert!(stored.weight >= 1, "Committed vote weight below one");
                    Ok((stored, result))
                })
            })
            .await?;

        info!(
            "Vote recorded for participant {} on {} (weight {})",
            stored.participant_id, stored.proposal_url, stored.weight
        );
        self.publish_refreshed(result).await;
        Ok(stored)
    }

    /// Deletes a participant's vote and republishes the shrunken tally,
    /// down to zero if theirs was the last vote.
    pub async fn delete_vote(
        &self,
        organization_id: &str,
        voter: &ParticipantRef,
        proposal_url: &str,
    ) -> Result<vote::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;
        let voter = voter.clone();

        let (deleted, result) = self
            .database
            .transaction::<_, (vote::Model, voting_result::Model), EngineError>(move |txn| {
                Box::pin(async move {
                    let participant = resolve_participant(txn, &organization_id, &voter, false)
                        .await
                        .map_err(absent_as(NO_VOTE_TO_DELETE))?;

                    let existing = vote::Entity::find()
                        .filter(vote::Column::OrganizationId.eq(organization_id.as_str()))
                        .filter(vote::Column::ParticipantId.eq(participant.id))
                        .filter(vote::Column::ProposalUrl.eq(proposal_url.as_str()))
                        .one(txn)
                        .await?
                        .ok_or_else(|| EngineError::NotFound(NO_VOTE_TO_DELETE.to_string()))?;

                    existing.clone().delete(txn).await?;
                    let result =
                        tally::recalculate_result(txn, &organization_id, &proposal_url).await?;
                    Ok((existing, result))
                })
            })
            .await?;

        info!(
            "Vote deleted for participant {} on {}",
            deleted.participant_id, deleted.proposal_url
        );
        self.publish_refreshed(result).await;
        Ok(deleted)
    }

    /// Creates a delegation after validating scope uniqueness, direct-vote
    /// precedence, self-delegation, and cycles. Proposal-specific
    /// delegations refresh that proposal's tally; global ones are lazy and
    /// rely on the explicit `recalculate` trigger.
    pub async fn create_delegation(
        &self,
        organization_id: &str,
        delegator: &ParticipantRef,
        delegate: &ParticipantRef,
        proposal_url: Option<&str>,
    ) -> Result<delegation::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let scope = validated_scope(proposal_url)?;
        let delegator = delegator.clone();
        let delegate = delegate.clone();

        let (stored, result) = self
            .database
            .transaction::<_, (delegation::Model, Option<voting_result::Model>), EngineError>(
                move |txn| {
                    Box::pin(async move {
                        let delegator =
                            resolve_participant(txn, &organization_id, &delegator, true).await?;
                        let delegate =
                            resolve_participant(txn, &organization_id, &delegate, true).await?;

                        if delegator.id == delegate.id {
                            return Err(EngineError::SelfDelegation);
                        }

                        ensure_scope_free(txn, &organization_id, delegator.id, scope.as_deref())
                            .await?;
                        ensure_no_cycle(
                            txn,
                            &organization_id,
                            delegator.id,
                            delegate.id,
                            scope.as_deref(),
                        )
                        .await?;

                        let stored = delegation::ActiveModel {
                            organization_id: Set(organization_id.clone()),
                            delegator_id: Set(delegator.id),
                            delegate_id: Set(delegate.id),
                            proposal_url: Set(scope.clone()),
                            created_at: Set(Utc::now().into()),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?;

                        let result = match scope.as_deref() {
                            Some(url) => {
                                Some(tally::recalculate_result(txn, &organization_id, url).await?)
                            }
                            // Global scope touches an unbounded set of
                            // proposals; freshness is deferred to the
                            // explicit recalculate trigger.
                            None => None,
                        };
                        Ok((stored, result))
                    })
                },
            )
            .await?;

        info!(
            "Delegation created: {} -> {} ({})",
            stored.delegator_id,
            stored.delegate_id,
            stored.proposal_url.as_deref().unwrap_or("global")
        );
        if let Some(result) = result {
            self.publish_refreshed(result).await;
        }
        Ok(stored)
    }

    /// Deletes a delegation. Only a proposal-specific scope triggers a
    /// recompute; a global delete is lazy, like its create.
    pub async fn delete_delegation(
        &self,
        organization_id: &str,
        delegator: &ParticipantRef,
        delegate: &ParticipantRef,
        proposal_url: Option<&str>,
    ) -> Result<delegation::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let scope = validated_scope(proposal_url)?;
        let delegator = delegator.clone();
        let delegate = delegate.clone();

        let (deleted, result) = self
            .database
            .transaction::<_, (delegation::Model, Option<voting_result::Model>), EngineError>(
                move |txn| {
                    Box::pin(async move {
                        let delegator =
                            resolve_participant(txn, &organization_id, &delegator, false)
                                .await
                                .map_err(absent_as(NO_DELEGATION_TO_DELETE))?;
                        let delegate = resolve_participant(txn, &organization_id, &delegate, false)
                            .await
                            .map_err(absent_as(NO_DELEGATION_TO_DELETE))?;

                        let mut select = delegation::Entity::find()
                            .filter(
                                delegation::Column::OrganizationId.eq(organization_id.as_str()),
                            )
                            .filter(delegation::Column::DelegatorId.eq(delegator.id))
                            .filter(delegation::Column::DelegateId.eq(delegate.id));
                        select = match scope.as_deref() {
                            Some(url) => select.filter(delegation::Column::ProposalUrl.eq(url)),
                            None => select.filter(delegation::Column::ProposalUrl.is_null()),
                        };

                        let existing = select.one(txn).await?.ok_or_else(|| {
                            EngineError::NotFound(NO_DELEGATION_TO_DELETE.to_string())
                        })?;

                        existing.clone().delete(txn).await?;

                        let result = match existing.proposal_url.as_deref() {
                            Some(url) => {
                                Some(tally::recalculate_result(txn, &organization_id, url).await?)
                            }
                            None => None,
                        };
                        Ok((existing, result))
                    })
                },
            )
            .await?;

        info!(
            "Delegation deleted: {} -> {} ({})",
            deleted.delegator_id,
            deleted.delegate_id,
            deleted.proposal_url.as_deref().unwrap_or("global")
        );
        if let Some(result) = result {
            self.publish_refreshed(result).await;
        }
        Ok(deleted)
    }

    /// The last committed tally for a proposal. Does not recompute; after
    /// a global delegation change the caller refreshes via `recalculate`.
    pub async fn get_result(
        &self,
        organization_id: &str,
        proposal_url: &str,
    ) -> Result<voting_result::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;

        voting_result::Entity::find_by_id((organization_id, proposal_url))
            .one(&self.database)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound("no voting result found for this proposal".to_string())
            })
    }

    /// Explicit full recompute of one proposal's tally, the freshness
    /// escape hatch for global delegation changes. Publishes the result.
    pub async fn recalculate(
        &self,
        organization_id: &str,
        proposal_url: &str,
    ) -> Result<voting_result::Model, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;

        let result = self
            .database
            .transaction::<_, voting_result::Model, EngineError>(move |txn| {
                Box::pin(async move {
                    tally::recalculate_result(txn, &organization_id, &proposal_url).await
                })
            })
            .await?;

        self.publish_refreshed(result.clone()).await;
        Ok(result)
    }

    /// Votes on a proposal with their voters, for the transport listing.
    pub async fn list_votes(
        &self,
        organization_id: &str,
        proposal_url: &str,
    ) -> Result<Vec<(vote::Model, Option<participant::Model>)>, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;

        let votes = vote::Entity::find()
            .filter(vote::Column::OrganizationId.eq(organization_id.as_str()))
            .filter(vote::Column::ProposalUrl.eq(proposal_url.as_str()))
            .find_also_related(participant::Entity)
            .all(&self.database)
            .await?;
        Ok(votes)
    }

    /// Delegations flowing out of and into one participant, looked up by
    /// email.
    pub async fn participant_delegations(
        &self,
        organization_id: &str,
        email: &str,
    ) -> Result<(participant::Model, Vec<delegation::Model>), EngineError> {
        let organization_id = validated_org(organization_id)?;
        let reference = ParticipantRef {
            id: None,
            email: Some(email.to_owned()),
            name: None,
        };
        let participant =
            resolve_participant(&self.database, &organization_id, &reference, false).await?;

        let delegations = delegation::Entity::find()
            .filter(delegation::Column::OrganizationId.eq(organization_id.as_str()))
            .filter(
                delegation::Column::DelegatorId
                    .eq(participant.id)
                    .or(delegation::Column::DelegateId.eq(participant.id)),
            )
            .all(&self.database)
            .await?;
        Ok((participant, delegations))
    }

    /// Subscription entry point for the transport layer.
    pub fn subscribe(
        &self,
        organization_id: &str,
        proposal_url: &str,
    ) -> Result<tokio::sync::broadcast::Receiver<ResultEvent>, EngineError> {
        let organization_id = validated_org(organization_id)?;
        let proposal_url = validated_proposal_url(proposal_url)?;
        Ok(self.notifier.subscribe(&organization_id, &proposal_url))
    }
}

/// Looks a participant up by id or email. With `upsert` set, an unknown
/// email is created and a provided display name overwrites the stored one
/// (last-write-wins; an omitted name leaves the stored one untouched).
async fn resolve_participant<C: sea_orm::ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    reference: &ParticipantRef,
    upsert: bool,
) -> Result<participant::Model, EngineError> {
    if let Some(id) = reference.id {
        let found = participant::Entity::find_by_id(id)
            .filter(participant::Column::OrganizationId.eq(organization_id))
            .one(conn)
            .await?;
        return found.ok_or_else(|| {
            EngineError::NotFound(format!("participant {id} not found in this organization"))
        });
    }

    let email = reference
        .email
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if email.is_empty() {
        return Err(EngineError::validation(
            "email",
            "participant id or email is required",
        ));
    }
    validated_identity(email, reference.name.as_deref())?;

    let existing = participant::Entity::find()
        .filter(participant::Column::OrganizationId.eq(organization_id))
        .filter(participant::Column::Email.eq(email))
        .one(conn)
        .await?;

    match existing {
        Some(found) => {
            let incoming = reference.name.as_deref().map(str::trim);
            if upsert && incoming.is_some() && incoming != found.name.as_deref() {
                let mut active: participant::ActiveModel = found.into();
                active.name = Set(incoming.map(str::to_owned));
                return Ok(active.update(conn).await?);
            }
            Ok(found)
        }
        None if upsert => {
            let created = participant::ActiveModel {
                organization_id: Set(organization_id.to_owned()),
                email: Set(email.to_owned()),
                name: Set(reference.name.as_deref().map(|n| n.trim().to_owned())),
                created_at: Set(Utc::now().into()),
                ..Default::default()
            }
            .insert(conn)
            .await?;
            Ok(created)
        }
        None => Err(EngineError::NotFound(format!(
            "participant {email} not found in this organization"
        ))),
    }
}

/// Rejects the create if the delegator already has a delegation in this
/// scope or already voted directly on the scoped proposal. The engine
/// enforces global-scope uniqueness itself because the unique index treats
/// NULL scopes as distinct.
async fn ensure_scope_free(
    txn: &DatabaseTransaction,
    organization_id: &str,
    delegator_id: i64,
    scope: Option<&str>,
) -> Result<(), EngineError> {
    let mut select = delegation::Entity::find()
        .filter(delegation::Column::OrganizationId.eq(organization_id))
        .filter(delegation::Column::DelegatorId.eq(delegator_id));
    select = match scope {
        Some(url) => select.filter(delegation::Column::ProposalUrl.eq(url)),
        None => select.filter(delegation::Column::ProposalUrl.is_null()),
    };
    if select.one(txn).await?.is_some() {
        return Err(EngineError::Conflict(
            "a delegation already exists for this scope; delete it first".to_string(),
        ));
    }

    if let Some(url) = scope {
        let voted = vote::Entity::find()
            .filter(vote::Column::OrganizationId.eq(organization_id))
            .filter(vote::Column::ParticipantId.eq(delegator_id))
            .filter(vote::Column::ProposalUrl.eq(url))
            .one(txn)
            .await?;
        if voted.is_some() {
            return Err(EngineError::Conflict(
                "participant already voted on this proposal; delete the vote first".to_string(),
            ));
        }
    }
    Ok(())
}

/// Walks effective delegations from the proposed delegate; reaching the
/// delegator means the new edge would close a cycle.
async fn ensure_no_cycle(
    txn: &DatabaseTransaction,
    organization_id: &str,
    delegator_id: i64,
    delegate_id: i64,
    scope: Option<&str>,
) -> Result<(), EngineError> {
    let rows = delegation::Entity::find()
        .filter(delegation::Column::OrganizationId.eq(organization_id))
        .all(txn)
        .await?;
    let edges: Vec<DelegationEdge> = rows
        .iter()
        .map(|d| DelegationEdge {
            delegator_id: d.delegator_id,
            delegate_id: d.delegate_id,
            proposal_url: d.proposal_url.clone(),
        })
        .collect();

    // A global edge participates in every proposal's resolution, so its
    // cycle check must see edges of every scope, not just the global ones.
    let closes_cycle = match scope {
        Some(url) => GraphSnapshot::for_proposal(url, &edges, []).reaches(delegate_id, delegator_id),
        None => graph::reaches_any_scope(&edges, delegate_id, delegator_id),
    };
    if closes_cycle {
        return Err(EngineError::Cycle);
    }
    Ok(())
}

/// The delegations a direct vote cancels: everything by this delegator
/// scoped to the voted proposal, plus their global delegation.
fn superseded_delegations(
    organization_id: &str,
    participant_id: i64,
    proposal_url: &str,
) -> Condition {
    Condition::all()
        .add(delegation::Column::OrganizationId.eq(organization_id))
        .add(delegation::Column::DelegatorId.eq(participant_id))
        .add(
            Condition::any()
                .add(delegation::Column::ProposalUrl.eq(proposal_url))
                .add(delegation::Column::ProposalUrl.is_null()),
        )
}

/// Post-commit sequencing: the cached read view is invalidated before the
/// event fans out, so a subscriber reacting to the push can never re-fetch
/// the superseded tally.
async fn publish_refreshed(cache: &ApiCache, notifier: &ResultBus, result: voting_result::Model) {
    cache
        .invalidate_result(&result.organization_id, &result.proposal_url)
        .await;
    notifier.publish(ResultEvent::from(result));
}

fn validated_org(organization_id: &str) -> Result<String, EngineError> {
    let trimmed = organization_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(
            "organization",
            "organization identifier must not be blank",
        ));
    }
    if trimmed.len() > MAX_ORG_LEN {
        return Err(EngineError::validation(
            "organization",
            "organization identifier too long",
        ));
    }
    Ok(trimmed.to_owned())
}

fn validated_proposal_url(proposal_url: &str) -> Result<String, EngineError> {
    let trimmed = proposal_url.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(
            "proposal_url",
            "proposal url must not be blank",
        ));
    }
    if trimmed.len() > MAX_PROPOSAL_URL_LEN {
        return Err(EngineError::validation("proposal_url", "proposal url too long"));
    }
    Ok(trimmed.to_owned())
}

fn validated_identity(email: &str, name: Option<&str>) -> Result<(), EngineError> {
    if !email.contains('@') || email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::validation("email", "not a valid email address"));
    }
    if let Some(name) = name {
        if name.trim().len() > MAX_NAME_LEN {
            return Err(EngineError::validation("name", "display name too long"));
        }
    }
    Ok(())
}

fn validated_scope(proposal_url: Option<&str>) -> Result<Option<String>, EngineError> {
    match proposal_url {
        Some(url) => Ok(Some(validated_proposal_url(url)?)),
        None => Ok(None),
    }
}

/// Maps a missing-participant lookup onto the fixed delete-of-absent
/// message; deletes of absent rows are an expected race, not a fault.
fn absent_as(message: &'static str) -> impl Fn(EngineError) -> EngineError {
    move |err| match err {
        EngineError::NotFound(_) => EngineError::NotFound(message.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_organization_is_rejected() {
        assert!(matches!(
            validated_org("  "),
            Err(EngineError::Validation { field: "organization", .. })
        ));
        assert_eq!(validated_org(" acme ").unwrap(), "acme");
    }

    #[test]
    fn blank_proposal_url_is_rejected() {
        assert!(matches!(
            validated_proposal_url(""),
            Err(EngineError::Validation { field: "proposal_url", .. })
        ));
        let long = "x".repeat(MAX_PROPOSAL_URL_LEN + 1);
        assert!(validated_proposal_url(&long).is_err());
    }

    #[test]
    fn scope_validation_passes_global_through() {
        assert_eq!(validated_scope(None).unwrap(), None);
        assert_eq!(
            validated_scope(Some("https://proposals.example/1")).unwrap(),
            Some("https://proposals.example/1".to_string())
        );
    }

    #[test]
    fn overlong_organization_is_rejected_not_fatal() {
        let long = "o".repeat(MAX_ORG_LEN + 1);
        assert!(matches!(
            validated_org(&long),
            Err(EngineError::Validation { field: "organization", .. })
        ));
        assert!(validated_org(&"o".repeat(MAX_ORG_LEN)).is_ok());
    }

    #[test]
    fn overlong_email_is_rejected_not_fatal() {
        let local = "a".repeat(MAX_EMAIL_LEN - 11);
        let overlong = format!("{local}@example.com");
        assert!(overlong.len() > MAX_EMAIL_LEN);
        assert!(matches!(
            validated_identity(&overlong, None),
            Err(EngineError::Validation { field: "email", .. })
        ));
        assert!(validated_identity("voter@example.com", Some("Ada")).is_ok());
        assert!(validated_identity("not-an-email", None).is_err());
        assert!(validated_identity("voter@example.com", Some(&"n".repeat(MAX_NAME_LEN + 1))).is_err());
    }

    #[test]
    fn vote_cancels_global_and_scoped_delegations() {
        use sea_orm::QueryTrait;

        let sql = delegation::Entity::delete_many()
            .filter(superseded_delegations("acme", 7, "https://proposals.example/1"))
            .build(sea_orm::DbBackend::Postgres)
            .to_string();
        assert!(sql.contains("IS NULL"), "global delegations must be covered: {sql}");
        assert!(sql.contains("https://proposals.example/1"));
        assert!(sql.contains("OR"), "scoped and global arms must both match: {sql}");
    }

    #[tokio::test]
    async fn publish_drops_cached_view_before_event() {
        use crate::config::CacheConfig;
        use crate::models::voting::ResultView;

        let cache = ApiCache::new(&CacheConfig {
            results_max_capacity: 128,
            results_ttl_seconds: 60,
        });
        let notifier = ResultBus::new();
        let mut receiver = notifier.subscribe("acme", "https://proposals.example/1");

        let stale = voting_result::Model {
            organization_id: "acme".to_string(),
            proposal_url: "https://proposals.example/1".to_string(),
            in_favor: 1,
            against: 0,
            updated_at: Utc::now().into(),
        };
        cache
            .results
            .insert(
                ApiCache::result_key("acme", "https://proposals.example/1"),
                Arc::new(ResultView::from(stale.clone())),
            )
            .await;

        let fresh = voting_result::Model {
            in_favor: 3,
            ..stale
        };
        publish_refreshed(&cache, &notifier, fresh).await;

        let cached = cache
            .results
            .get(&ApiCache::result_key("acme", "https://proposals.example/1"))
            .await;
        assert!(cached.is_none(), "stale view must be gone once the event is out");
        let event = receiver.try_recv().expect("subscriber sees the publish");
        assert_eq!(event.in_favor, 3);
    }

    #[test]
    fn absent_mapping_preserves_other_errors() {
        let mapped = absent_as(NO_VOTE_TO_DELETE)(EngineError::NotFound("x".to_string()));
        assert!(matches!(mapped, EngineError::NotFound(msg) if msg == NO_VOTE_TO_DELETE));

        let untouched = absent_as(NO_VOTE_TO_DELETE)(EngineError::Cycle);
        assert!(matches!(untouched, EngineError::Cycle));
    }
}
