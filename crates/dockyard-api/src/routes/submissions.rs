//! Submission endpoints.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dockyard_core::{Language, Submission, TeamId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/statuses", post(statuses))
        .route("/{team_id}", get(status).post(enqueue))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

fn parse_team_id(raw: &str) -> Result<TeamId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("team id must be a number, got {:?}", raw)))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    submission: SubmissionRef,
}

#[derive(Debug, Serialize)]
struct SubmissionRef {
    id: String,
}

async fn enqueue(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let team_id = parse_team_id(&team_id)?;

    let mut archive = None;
    let mut language = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("submission") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("cannot read upload: {}", e)))?;
                archive = Some(bytes);
            }
            Some("lang") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("cannot read lang: {}", e)))?;
                language = Some(text.trim().parse::<Language>()?);
            }
            _ => {}
        }
    }

    let archive = archive
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("file must be uploaded".to_string()))?;
    let language =
        language.ok_or_else(|| ApiError::BadRequest("lang must be provided".to_string()))?;

    let id = state.scheduler.enqueue(team_id, language, archive).await?;
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            submission: SubmissionRef { id: id.to_string() },
        }),
    ))
}

async fn status(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> Result<Json<Submission>, ApiError> {
    let team_id = parse_team_id(&team_id)?;
    let submission = state.scheduler.status_of(team_id).await?;
    Ok(Json(submission))
}

#[derive(Debug, Deserialize)]
struct StatusesRequest {
    ids: Vec<TeamId>,
}

/// Current submission per requested team, `{}` for teams without one.
async fn statuses(
    State(state): State<AppState>,
    Json(req): Json<StatusesRequest>,
) -> Result<Json<Vec<(TeamId, Value)>>, ApiError> {
    let statuses = state.scheduler.statuses_of(&req.ids).await;
    let body = statuses
        .into_iter()
        .map(|(team_id, submission)| {
            let value = match submission {
                Some(submission) => serde_json::to_value(submission)
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
                None => json!({}),
            };
            Ok((team_id, value))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    Ok(Json(body))
}
