use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use crate::error::AppError;

use super::domain::{LeadId, NewLead, PipelineStage, QueueEntry, QueueId, RealtorId};
use super::notify::LeadNotifier;
use super::service::{DistributionError, LeadDistributionService};
use super::store::DistributionStore;

type SharedService<S, N> = Arc<LeadDistributionService<S, N>>;

/// Router builder exposing lead intake, realtor actions, and queue administration.
pub fn distribution_router<S, N>(service: SharedService<S, N>) -> Router
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    Router::new()
        .route("/api/v1/leads", post(register_handler::<S, N>))
        .route("/api/v1/leads/:lead_id", get(lead_handler::<S, N>))
        .route(
            "/api/v1/leads/:lead_id/history",
            get(history_handler::<S, N>),
        )
        .route("/api/v1/leads/:lead_id/accept", post(accept_handler::<S, N>))
        .route("/api/v1/leads/:lead_id/reject", post(reject_handler::<S, N>))
        .route(
            "/api/v1/leads/:lead_id/release",
            post(release_handler::<S, N>),
        )
        .route("/api/v1/leads/:lead_id/assign", post(assign_handler::<S, N>))
        .route("/api/v1/leads/:lead_id/stage", post(stage_handler::<S, N>))
        .route("/api/v1/queues/:queue_id", get(snapshot_handler::<S, N>))
        .route(
            "/api/v1/queues/:queue_id/realtors",
            post(join_handler::<S, N>),
        )
        .route(
            "/api/v1/queues/:queue_id/realtors/:realtor_id",
            delete(leave_handler::<S, N>),
        )
        .route(
            "/api/v1/queues/:queue_id/realtors/:realtor_id/pause",
            post(pause_handler::<S, N>),
        )
        .route(
            "/api/v1/queues/:queue_id/realtors/:realtor_id/resume",
            post(resume_handler::<S, N>),
        )
        .route("/api/v1/queues/:queue_id/swap", post(swap_handler::<S, N>))
        .route("/api/v1/queues/:queue_id/move", post(move_handler::<S, N>))
        .route(
            "/api/v1/queues/:queue_id/rebalance",
            post(rebalance_handler::<S, N>),
        )
        .route(
            "/api/v1/maintenance/expire",
            post(expire_handler::<S, N>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct RealtorAction {
    pub(crate) realtor_id: RealtorId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    pub(crate) realtor_id: RealtorId,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StageRequest {
    pub(crate) realtor_id: RealtorId,
    pub(crate) stage: PipelineStage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinRequest {
    pub(crate) realtor_id: RealtorId,
    pub(crate) display_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SwapRequest {
    pub(crate) first: RealtorId,
    pub(crate) second: RealtorId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MoveRequest {
    pub(crate) realtor_id: RealtorId,
    pub(crate) position: u32,
}

/// HTTP status for a distribution failure.
pub fn status_for(err: &DistributionError) -> StatusCode {
    match err {
        DistributionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DistributionError::LeadNotFound(_) | DistributionError::RealtorNotInQueue { .. } => {
            StatusCode::NOT_FOUND
        }
        DistributionError::NotReservedFor { .. }
        | DistributionError::NotAssignedTo { .. }
        | DistributionError::InvalidTransition { .. }
        | DistributionError::InvalidStage { .. }
        | DistributionError::Conflict(_) => StatusCode::CONFLICT,
        DistributionError::ReservationExpired { .. } => StatusCode::GONE,
        DistributionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(err: impl Into<AppError>) -> Response {
    err.into().into_response()
}

fn queue_response(result: Result<Vec<QueueEntry>, DistributionError>) -> Response {
    match result {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn register_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    payload: Result<axum::Json<NewLead>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(intake) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.register_lead(intake, Utc::now()) {
        Ok(lead) => (StatusCode::CREATED, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn lead_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    match service.lead(&LeadId(lead_id)) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn history_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    match service.lead_history(&LeadId(lead_id)) {
        Ok(events) => (StatusCode::OK, axum::Json(events)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn accept_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
    payload: Result<axum::Json<RealtorAction>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.accept(&LeadId(lead_id), &request.realtor_id, Utc::now()) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reject_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
    payload: Result<axum::Json<RejectRequest>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    let RejectRequest { realtor_id, reason } = request;
    match service.reject(&LeadId(lead_id), &realtor_id, reason, Utc::now()) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn release_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
    payload: Result<axum::Json<RealtorAction>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.release(&LeadId(lead_id), &request.realtor_id, Utc::now()) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn assign_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
    payload: Result<axum::Json<RealtorAction>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.assign_manually(&LeadId(lead_id), &request.realtor_id, Utc::now()) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn stage_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(lead_id): Path<String>,
    payload: Result<axum::Json<StageRequest>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.advance_stage(
        &LeadId(lead_id),
        &request.realtor_id,
        request.stage,
        Utc::now(),
    ) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead.view())).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn snapshot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(queue_id): Path<String>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    queue_response(service.queue_snapshot(&QueueId(queue_id)))
}

pub(crate) async fn join_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(queue_id): Path<String>,
    payload: Result<axum::Json<JoinRequest>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    match service.join_queue(
        &QueueId(queue_id),
        &request.realtor_id,
        &request.display_name,
        Utc::now(),
    ) {
        Ok(entry) => (StatusCode::CREATED, axum::Json(entry)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn leave_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path((queue_id, realtor_id)): Path<(String, String)>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    match service.leave_queue(&QueueId(queue_id), &RealtorId(realtor_id), Utc::now()) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn pause_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path((queue_id, realtor_id)): Path<(String, String)>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    queue_response(service.pause(&QueueId(queue_id), &RealtorId(realtor_id)))
}

pub(crate) async fn resume_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path((queue_id, realtor_id)): Path<(String, String)>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    queue_response(service.resume(&QueueId(queue_id), &RealtorId(realtor_id), Utc::now()))
}

pub(crate) async fn swap_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(queue_id): Path<String>,
    payload: Result<axum::Json<SwapRequest>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    queue_response(service.swap_positions(&QueueId(queue_id), &request.first, &request.second))
}

pub(crate) async fn move_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(queue_id): Path<String>,
    payload: Result<axum::Json<MoveRequest>, JsonRejection>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    let axum::Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(rejection),
    };
    queue_response(service.move_to(&QueueId(queue_id), &request.realtor_id, request.position))
}

pub(crate) async fn rebalance_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(queue_id): Path<String>,
) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    queue_response(service.rebalance(&QueueId(queue_id)))
}

pub(crate) async fn expire_handler<S, N>(State(service): State<SharedService<S, N>>) -> Response
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    match service.expire_due(Utc::now()) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}
