use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::api::{JobStatusResponse, SubmitResponse};
use crate::models::booking::BookingRequest;
use crate::models::job::{JobPayload, JobType, Status};
use crate::models::search::SearchRequest;
use crate::services::submitter::SubmitError;

/// Authenticated user id, set by the gateway in front of this service.
const USER_ID_HEADER: &str = "x-user-id";

fn user_id(headers: &HeaderMap) -> Result<String, StatusCode> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn submit(
    state: &AppState,
    job_type: JobType,
    user_id: &str,
    payload: JobPayload,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let job_id = state
        .submitter
        .submit(job_type, user_id, payload)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, job_type = %job_type, "Job submission failed");
            match e {
                SubmitError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SubmitError::Publish { .. }
                | SubmitError::Persistence(StoreError::Unavailable(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SubmitError::Encode(_) | SubmitError::Persistence(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            job_status: Status::not_set(),
            message: "Job accepted for processing".to_string(),
        }),
    ))
}

/// POST /api/v1/bookings: queue a booking for asynchronous persistence.
pub async fn submit_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let user_id = user_id(&headers)?;
    request.validate().map_err(|e| {
        tracing::debug!(error = %e, "Rejected booking request");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    submit(
        &state,
        JobType::CreateBooking,
        &user_id,
        JobPayload::BookingRequest(request),
    )
    .await
}

/// POST /api/v1/searches: queue a search.
pub async fn submit_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    let user_id = user_id(&headers)?;
    request.validate().map_err(|e| {
        tracing::debug!(error = %e, "Rejected search request");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    submit(
        &state,
        JobType::CreateSearch,
        &user_id,
        JobPayload::SearchRequest(request),
    )
    .await
}

/// GET /api/v1/jobs/{job_id}: derived job status, with the result only
/// once the job finished successfully.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let view = state
        .aggregator
        .job_view(job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job status");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(JobStatusResponse {
        job_id: view.job.id,
        job_type: view.job.job_type,
        job_status: view.report.status,
        stop_time: view.report.stop_time,
        result: view.result,
    }))
}
