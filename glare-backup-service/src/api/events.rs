use crate::model::BackupEvent;
use crate::repo::event::EventRepo;
use crate::service::auth::{AuthCtx, AuthService};
use crate::service::event_stream::{EventStreamRegistry, TickGuard};
use chrono::{DateTime, Utc};
use glare_common::model::{TokenSecret, UserId};
use poem::http::StatusCode;
use poem::web::Data;
use poem::{handler, Body, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_BATCH_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct EventStreamState {
    pub auth_service: Arc<dyn AuthService>,
    pub event_repo: Arc<dyn EventRepo>,
    pub registry: Arc<EventStreamRegistry>,
}

struct StreamState {
    event_repo: Arc<dyn EventRepo>,
    user_id: UserId,
    cursor: DateTime<Utc>,
    interval: tokio::time::Interval,
    // Dropping the stream drops the guard and releases the registry entry.
    _guard: TickGuard,
}

/// Long-lived server-sent-events endpoint streaming the caller's backup
/// events. Each connection holds a periodic ticker registered in the
/// process-wide connection table and released when the client goes away.
#[handler]
pub async fn event_stream(req: &Request, Data(state): Data<&EventStreamState>) -> Response {
    let auth = match authenticate(req, state).await {
        Ok(auth) => auth,
        Err(response) => return response,
    };

    let guard = state.registry.register(Uuid::new_v4());
    let stream_state = StreamState {
        event_repo: state.event_repo.clone(),
        user_id: auth.user_id,
        cursor: Utc::now(),
        interval: tokio::time::interval(EVENT_POLL_INTERVAL),
        _guard: guard,
    };

    let stream = futures::stream::unfold(stream_state, |mut state| async move {
        state.interval.tick().await;

        let mut payload = String::new();
        match state
            .event_repo
            .created_after(&state.user_id.0, state.cursor, EVENT_BATCH_LIMIT)
            .await
        {
            Ok(records) => {
                for record in records {
                    state.cursor = state.cursor.max(record.created_at);
                    if let Ok(event) = BackupEvent::try_from(record) {
                        if let Ok(json) = serde_json::to_string(&event) {
                            payload.push_str("data: ");
                            payload.push_str(&json);
                            payload.push_str("\n\n");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(user_id = %state.user_id, "Event stream poll failed: {err}");
            }
        }

        if payload.is_empty() {
            payload.push_str(": keep-alive\n\n");
        }

        Some((Ok::<Vec<u8>, std::io::Error>(payload.into_bytes()), state))
    });

    Response::builder()
        .content_type("text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_bytes_stream(stream))
}

async fn authenticate(req: &Request, state: &EventStreamState) -> Result<AuthCtx, Response> {
    let token = req
        .headers()
        .get(poem::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| TokenSecret::new(token.to_string()));

    let Some(token) = token else {
        return Err(unauthorized());
    };

    state
        .auth_service
        .authenticate(&token)
        .await
        .map_err(|_| unauthorized())
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .content_type("application/json")
        .body(r#"{"error":"Invalid token"}"#)
}
