//! Router construction and handlers for the REST surface:
//! `Router::new().route(...).with_state(state)` wired up per endpoint.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use marketplace_core::{CoreError, Event};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::dto::*;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", get(list_agents).post(upsert_agent))
        .route("/agents/:id", patch(patch_agent))
        .route("/jobboard", get(list_jobboard).post(create_job))
        .route("/jobboard/:id/confirm-escrow", post(confirm_escrow))
        .route("/jobboard/:id/bid", post(submit_bid))
        .route("/jobboard/:id/accept", post(accept_bid))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/status", patch(force_status))
        .route("/tasks/:id/work", post(submit_work))
        .route("/tasks/:id/refund", post(refund))
        .route("/tasks/activity/feed", get(activity_feed))
        .route("/identity/lookup/:handle", get(lookup_identity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

type S = State<Arc<AppState>>;

async fn health(State(state): S) -> Json<HealthResponse> {
    let health = state.coordinator.health_check().await;
    Json(HealthResponse {
        status: if health.healthy { "ok" } else { "degraded" },
        timestamp: chrono::Utc::now(),
        components: health.components,
    })
}

async fn list_agents(State(state): S) -> ApiResult<Json<Vec<AgentResponse>>> {
    let agents = state.coordinator.list_agents().await?;
    Ok(Json(agents.into_iter().map(AgentResponse::from).collect()))
}

async fn upsert_agent(
    State(state): S,
    Json(body): Json<UpsertAgentRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<AgentResponse>)> {
    let agent = state
        .coordinator
        .upsert_agent(body.handle, body.wallet, body.role, body.skills, body.max_liability)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(AgentResponse::from(agent))))
}

async fn patch_agent(
    State(state): S,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchAgentRequest>,
) -> ApiResult<Json<AgentResponse>> {
    let agent = state
        .coordinator
        .patch_agent(
            id,
            coordinator_core::AgentPatch {
                role: body.role,
                skills: body.skills,
                active: body.active,
                max_liability: body.max_liability,
            },
        )
        .await?;
    Ok(Json(AgentResponse::from(agent)))
}

async fn list_jobboard(State(state): S) -> ApiResult<Json<Vec<PostingResponse>>> {
    let postings = state.coordinator.list_postings().await?;
    let mut out = Vec::with_capacity(postings.len());
    for posting in postings {
        let bids = state.coordinator.list_bids(posting.id).await?;
        out.push(PostingResponse::new(posting, bids));
    }
    Ok(Json(out))
}

async fn create_job(
    State(state): S,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<PostingResponse>)> {
    let (_task, posting) = state
        .coordinator
        .create_job(body.title, body.description, body.budget, body.required_skills, body.creator_wallet)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(PostingResponse::new(posting, vec![]))))
}

async fn confirm_escrow(
    State(state): S,
    Path(job_id): Path<Uuid>,
    Json(body): Json<ConfirmEscrowRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let posting = state.coordinator.get_posting(job_id).await?;

    let task = state
        .coordinator
        .confirm_escrow(posting.task_id, body.external_ref, body.depositor_wallet)
        .await?;
    Ok(Json(TaskResponse::from_owned_task(task)))
}

async fn submit_bid(
    State(state): S,
    Path(job_id): Path<Uuid>,
    Json(body): Json<SubmitBidRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<BidResponse>)> {
    let bid = state
        .coordinator
        .submit_bid(
            job_id,
            body.worker_id,
            body.worker_handle,
            body.message,
            body.relevance_score,
            body.estimated_time,
            body.proposed_amount,
        )
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(BidResponse::from(bid))))
}

async fn accept_bid(
    State(state): S,
    Path(job_id): Path<Uuid>,
    Json(body): Json<AcceptBidRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.coordinator.accept_bid(job_id, body.bid_id, body.caller_wallet).await?;
    Ok(Json(TaskResponse::from_owned_task(task)))
}

async fn list_tasks(State(state): S, Query(q): Query<AddressQuery>) -> ApiResult<Json<Vec<TaskResponse>>> {
    let tasks = match q.address {
        Some(addr) => state.coordinator.list_tasks_for(&addr).await?,
        None => vec![],
    };
    Ok(Json(tasks.into_iter().map(TaskResponse::from_owned_task).collect()))
}

async fn get_task(State(state): S, Path(id): Path<Uuid>, Query(q): Query<AddressQuery>) -> ApiResult<Json<TaskResponse>> {
    let view = state.coordinator.get_task_view(id, q.address.as_deref()).await?;
    Ok(Json(TaskResponse::from_view(view)))
}

/// admin status override; the only supported target is `reversed`,
/// the `ForceClose` transition of (review/held -> reversed/refunded).
async fn force_status(
    State(state): S,
    Path(id): Path<Uuid>,
    Json(body): Json<ForceStatusRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let event = match body.status.as_str() {
        "reversed" => Event::ForceClose,
        other => {
            return Err(ApiError(CoreError::validation(format!(
                "admin status override does not support target status {other}"
            ))))
        }
    };
    let task = state.coordinator.force_status(id, event, body.agent_id).await?;
    Ok(Json(TaskResponse::from_owned_task(task)))
}

async fn submit_work(
    State(state): S,
    Path(id): Path<Uuid>,
    Json(body): Json<SubmitWorkRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.coordinator.submit_work(id, body.worker_id, body.result).await?;
    Ok(Json(TaskResponse::from_owned_task(task)))
}

async fn refund(
    State(state): S,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.coordinator.refund(id, body.caller_wallet).await?;
    Ok(Json(TaskResponse::from_owned_task(task)))
}

async fn activity_feed(State(state): S, Query(q): Query<AddressQuery>) -> ApiResult<Json<Vec<ActivityResponse>>> {
    let address = q
        .address
        .ok_or_else(|| ApiError(CoreError::validation("address query parameter is required")))?;
    let activity = state.coordinator.activity_feed(&address).await?;
    Ok(Json(activity.into_iter().map(ActivityResponse::from).collect()))
}

async fn lookup_identity(State(state): S, Path(handle): Path<String>) -> ApiResult<Json<IdentityLookupResponse>> {
    let record = state.coordinator.lookup_identity(&handle).await?;
    Ok(Json(IdentityLookupResponse {
        node_ref: record.node_ref.0,
        wallet: record.wallet,
        attributes: record.attributes,
    }))
}
