use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use inventory_common::event::ObjectCreatedEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::producer::ProduceSummary;

use super::AppState;

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ObjectCreatedResponse {
    #[serde(flatten)]
    pub summary: Option<ProduceSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ingest every object named in an object-created notification.
///
/// Answers 400 when the notification cannot be used and 500 when a run fails, so the
/// notifier's own retry handling sees the failure.
pub async fn post_object_created(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ObjectCreatedResponse>, (StatusCode, Json<ObjectCreatedResponse>)> {
    let event: ObjectCreatedEvent = serde_json::from_slice(&body).map_err(|err| {
        let msg = format!("unable to deserialize notification: {}", err);
        bad_request(&msg)
    })?;
    debug!("received notification: {:?}", event);

    let locations = event
        .locations()
        .map_err(|err| bad_request(&err.to_string()))?;

    let summary = state
        .producer
        .ingest_all(state.source.as_ref(), &locations)
        .await
        .map_err(internal_error)?;

    Ok(Json(ObjectCreatedResponse {
        summary: Some(summary),
        error: None,
    }))
}

fn bad_request(msg: &str) -> (StatusCode, Json<ObjectCreatedResponse>) {
    error!(msg);
    (
        StatusCode::BAD_REQUEST,
        Json(ObjectCreatedResponse {
            summary: None,
            error: Some(msg.to_owned()),
        }),
    )
}

fn internal_error<E>(err: E) -> (StatusCode, Json<ObjectCreatedResponse>)
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ObjectCreatedResponse {
            summary: None,
            error: Some(err.to_string()),
        }),
    )
}
