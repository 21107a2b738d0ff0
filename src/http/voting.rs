//! Transport handlers for votes, delegations, results, and the
//! per-proposal result subscription socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::voting::{
    CreateDelegationRequest, CreateVoteRequest, DelegationView, DeleteDelegationRequest,
    DeleteVoteRequest, ParticipantView, RecalculateRequest, ResultView, VoteView,
};
use crate::engine::notify::ResultEvent;
use crate::state::{ApiCache, AppState};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/votes", get(list_votes).post(create_vote).delete(delete_vote))
        .route("/delegations", post(create_delegation).delete(delete_delegation))
        .route("/delegations/{email}", get(get_participant_delegations))
        .route("/results", get(get_result))
        .route("/results/recalculate", post(recalculate_result))
        .route("/results/subscribe", get(subscribe_results))
}

#[derive(Debug, Deserialize)]
struct ProposalQuery {
    proposal_url: String,
}

async fn create_vote(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CreateVoteRequest>,
) -> Result<(StatusCode, Json<VoteView>), HttpError> {
    let stored = state
        .engine
        .create_vote(&org, &request.voter, &request.proposal_url, request.in_favor)
        .await?;

    let view = VoteView::from_models(stored, None);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn delete_vote(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<DeleteVoteRequest>,
) -> Result<Json<VoteView>, HttpError> {
    let deleted = state
        .engine
        .delete_vote(&org, &request.voter, &request.proposal_url)
        .await?;

    Ok(Json(VoteView::from_models(deleted, None)))
}

async fn list_votes(
    Path(org): Path<String>,
    Query(query): Query<ProposalQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<VoteView>>, HttpError> {
    let votes = state.engine.list_votes(&org, &query.proposal_url).await?;
    let views = votes
        .into_iter()
        .map(|(vote, voter)| VoteView::from_models(vote, voter))
        .collect::<Vec<_>>();
    Ok(Json(views))
}

async fn create_delegation(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CreateDelegationRequest>,
) -> Result<(StatusCode, Json<DelegationView>), HttpError> {
    let stored = state
        .engine
        .create_delegation(
            &org,
            &request.delegator,
            &request.delegate,
            request.proposal_url.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(DelegationView::from(stored))))
}

async fn delete_delegation(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<DeleteDelegationRequest>,
) -> Result<Json<DelegationView>, HttpError> {
    let deleted = state
        .engine
        .delete_delegation(
            &org,
            &request.delegator,
            &request.delegate,
            request.proposal_url.as_deref(),
        )
        .await?;

    Ok(Json(DelegationView::from(deleted)))
}

async fn get_participant_delegations(
    Path((org, email)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ParticipantView>, HttpError> {
    let email = email.trim().to_string();
    if email.is_empty() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "email must not be empty".to_string(),
        ));
    }
    let (participant, delegations) = state.engine.participant_delegations(&org, &email).await?;

    let (out, into): (Vec<_>, Vec<_>) = delegations
        .into_iter()
        .partition(|d| d.delegator_id == participant.id);

    let view = ParticipantView {
        id: participant.id,
        email: participant.email,
        name: participant.name,
        delegations_out: out.into_iter().map(DelegationView::from).collect(),
        delegations_in: into.into_iter().map(DelegationView::from).collect(),
    };
    Ok(Json(view))
}

async fn get_result(
    Path(org): Path<String>,
    Query(query): Query<ProposalQuery>,
    State(state): State<AppState>,
) -> Result<Json<ResultView>, HttpError> {
    let key = ApiCache::result_key(&org, &query.proposal_url);
    if let Some(cached) = state.cache.results.get(&key).await {
        return Ok(Json((*cached).clone()));
    }

    let result = state.engine.get_result(&org, &query.proposal_url).await?;
    let view = ResultView::from(result);
    state.cache.results.insert(key, Arc::new(view.clone())).await;
    Ok(Json(view))
}

async fn recalculate_result(
    Path(org): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RecalculateRequest>,
) -> Result<Json<ResultView>, HttpError> {
    let result = state
        .engine
        .recalculate(&org, &request.proposal_url)
        .await?;

    info!(
        "Recalculated result for {}/{}",
        result.organization_id, result.proposal_url
    );
    Ok(Json(ResultView::from(result)))
}

async fn subscribe_results(
    Path(org): Path<String>,
    Query(query): Query<ProposalQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, HttpError> {
    let receiver = state.engine.subscribe(&org, &query.proposal_url)?;
    debug!("Subscription opened for {}/{}", org, query.proposal_url);
    Ok(ws.on_upgrade(move |socket| forward_results(socket, receiver)))
}

/// Pushes each published tally to the socket as one JSON text frame.
/// Best-effort: a lagged receiver skips to the freshest event, and the
/// loop ends when either side goes away.
async fn forward_results(mut socket: WebSocket, mut receiver: broadcast::Receiver<ResultEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Subscriber lagged, skipped {skipped} results");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("Failed to serialize result event: {err}");
                continue;
            }
        };

        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
}
