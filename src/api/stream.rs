use crate::api::AppState;
use crate::broadcast::{StreamMessage, SubscriptionFilter};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub types: Option<String>,
    pub region: Option<String>,
    pub category: Option<String>,
    pub last_seq: Option<String>,
}

/// Server-Sent Events stream of live facts. The filter is validated before
/// the connection is registered.
pub async fn get_stream(
    Query(params): Query<StreamQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let filter = SubscriptionFilter::parse(
        params.types.as_deref(),
        params.region.as_deref(),
        params.category.as_deref(),
    )?;

    let resume = params.last_seq.or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let last_seq = match resume.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| AppError::BadRequest("lastSeq must be a non-negative integer".to_string()))?,
        ),
        None => None,
    };

    let subscription = state.engine.subscribe(filter, last_seq);
    let stream = subscription
        .into_stream()
        .map(|message| Ok(to_sse(message)));
    Ok(Sse::new(stream))
}

fn to_sse(message: StreamMessage) -> Event {
    let (name, id, data) = match &message {
        StreamMessage::Update(envelope) => (
            envelope.update_type.as_str(),
            Some(envelope.seq),
            serde_json::to_value(envelope.as_ref()),
        ),
        StreamMessage::Heartbeat { timestamp } => {
            ("heartbeat", None, Ok(json!({ "timestamp": timestamp })))
        }
        StreamMessage::Gap(gap) => ("gap", None, serde_json::to_value(gap)),
        StreamMessage::Closed { reason } => ("closed", None, Ok(json!({ "reason": reason }))),
    };
    let event = Event::default().event(name);
    let event = match id {
        Some(seq) => event.id(seq.to_string()),
        None => event,
    };
    match data {
        Ok(value) => event.data(value.to_string()),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to serialize stream message");
            event.data("{}")
        }
    }
}
