use serde::{Deserialize, Serialize};

use crate::engine::ParticipantRef;
use crate::entities::{delegation, participant, vote, voting_result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteView {
    pub proposal_url: String,
    pub participant_id: i64,
    pub voter_email: Option<String>,
    pub voter_name: Option<String>,
    pub in_favor: bool,
    pub weight: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl VoteView {
    pub fn from_models(vote: vote::Model, voter: Option<participant::Model>) -> Self {
        Self {
            proposal_url: vote.proposal_url,
            participant_id: vote.participant_id,
            voter_email: voter.as_ref().map(|p| p.email.clone()),
            voter_name: voter.and_then(|p| p.name),
            in_favor: vote.in_favor,
            weight: vote.weight,
            created_at: vote.created_at.timestamp(),
            updated_at: vote.updated_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationView {
    pub delegator_id: i64,
    pub delegate_id: i64,
    /// None = global delegation
    pub proposal_url: Option<String>,
    pub created_at: i64,
}

impl From<delegation::Model> for DelegationView {
    fn from(model: delegation::Model) -> Self {
        Self {
            delegator_id: model.delegator_id,
            delegate_id: model.delegate_id,
            proposal_url: model.proposal_url,
            created_at: model.created_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultView {
    pub organization_id: String,
    pub proposal_url: String,
    pub in_favor: i64,
    pub against: i64,
    pub updated_at: i64,
}

impl From<voting_result::Model> for ResultView {
    fn from(model: voting_result::Model) -> Self {
        Self {
            organization_id: model.organization_id,
            proposal_url: model.proposal_url,
            in_favor: model.in_favor,
            against: model.against,
            updated_at: model.updated_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub delegations_out: Vec<DelegationView>,
    pub delegations_in: Vec<DelegationView>,
}

// Request bodies for the voting HTTP API

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVoteRequest {
    pub voter: ParticipantRef,
    pub proposal_url: String,
    pub in_favor: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteVoteRequest {
    pub voter: ParticipantRef,
    pub proposal_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDelegationRequest {
    pub delegator: ParticipantRef,
    pub delegate: ParticipantRef,
    /// Omit for a global delegation
    pub proposal_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteDelegationRequest {
    pub delegator: ParticipantRef,
    pub delegate: ParticipantRef,
    pub proposal_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecalculateRequest {
    pub proposal_url: String,
}
