//! HTTP control API.
//!
//! Read and control endpoints over a running [`Controller`], plus a
//! Server-Sent Events feed of store snapshots for dashboards.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /intersections` | all records with signal aspects |
//! | `GET /intersections/{id}` | one record |
//! | `POST /intersections/{id}/actions/{action}` | `pause`, `reset`, `manual` |
//! | `POST /emergency/{kind}` | `all-stop`, `priority-clear`, `resume` |
//! | `GET /events` | SSE stream of snapshots |
//! | `GET /health` | liveness |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::{ControlError, SignalError};
use crate::signal::control::suggest_emergency;
use crate::signal::{EmergencyAction, Intersection, IntersectionId, SignalAspects};

// ============================================================================
// Views
// ============================================================================

/// An intersection as served over HTTP: the wire record plus the aspect
/// each approach currently shows.
#[derive(Debug, Clone, Serialize)]
pub struct IntersectionView {
    #[serde(flatten)]
    pub intersection: Intersection,
    pub aspects: SignalAspects,
}

impl From<Intersection> for IntersectionView {
    fn from(intersection: Intersection) -> Self {
        let aspects = SignalAspects::from_phase(&intersection.record.current_phase);
        Self {
            intersection,
            aspects,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    #[serde(flatten)]
    view: IntersectionView,
    applied: bool,
}

#[derive(Debug, Serialize)]
struct EmergencyResponse {
    kind: &'static str,
    affected: Vec<IntersectionView>,
    skipped: Vec<IntersectionId>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error mapped to an HTTP status with a JSON body.
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::UnknownIntersection(_) => Self::NotFound(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the API router over a running controller.
pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/intersections", get(list_intersections))
        .route("/intersections/{id}", get(get_intersection))
        .route("/intersections/{id}/actions/{action}", post(apply_action))
        .route("/emergency/{kind}", post(apply_emergency))
        .route("/events", get(snapshot_events))
        .route("/health", get(health))
        .with_state(controller)
}

async fn list_intersections(State(controller): State<Arc<Controller>>) -> Json<Vec<IntersectionView>> {
    Json(views(controller.snapshot()))
}

async fn get_intersection(
    State(controller): State<Arc<Controller>>,
    Path(id): Path<String>,
) -> Result<Json<IntersectionView>, ApiError> {
    let id = IntersectionId::new(id);
    let record = controller
        .get(&id)
        .ok_or_else(|| ControlError::UnknownIntersection(id.clone()))?;
    Ok(Json(Intersection { id, record }.into()))
}

async fn apply_action(
    State(controller): State<Arc<Controller>>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    let id = IntersectionId::new(id);
    let outcome = controller.control(&id, &action)?;
    Ok(Json(ActionResponse {
        view: Intersection {
            id,
            record: outcome.record,
        }
        .into(),
        applied: outcome.applied,
    }))
}

async fn apply_emergency(
    State(controller): State<Arc<Controller>>,
    Path(kind): Path<String>,
) -> Result<Json<EmergencyResponse>, ApiError> {
    let Some(action) = EmergencyAction::parse(&kind) else {
        let mut msg = format!("unknown emergency kind '{kind}'");
        if let Some(suggestion) = suggest_emergency(&kind) {
            msg.push_str(&format!("; did you mean '{suggestion}'?"));
        }
        warn!(kind = %kind, "rejected emergency request");
        return Err(ApiError::BadRequest(msg));
    };
    let report = controller.emergency(action);
    Ok(Json(EmergencyResponse {
        kind: action.as_str(),
        affected: views(report.affected),
        skipped: report.skipped,
    }))
}

/// Streams a snapshot event after every store change.
///
/// Slow clients skip ahead to the newest snapshot.
async fn snapshot_events(
    State(controller): State<Arc<Controller>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = controller.store().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let snapshot = result.ok()?;
        let event = SseEvent::default()
            .event("snapshot")
            .json_data(views(snapshot))
            .ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health() -> &'static str {
    "ok"
}

fn views(items: Vec<Intersection>) -> Vec<IntersectionView> {
    items.into_iter().map(IntersectionView::from).collect()
}

// ============================================================================
// Server
// ============================================================================

/// Binds the API and serves it until `cancel` fires.
///
/// Returns the bound address (useful when binding port 0) and the server
/// task.
///
/// # Errors
///
/// Returns a usage error for a malformed address and an I/O error if the
/// listener cannot bind.
pub async fn serve(
    controller: Arc<Controller>,
    bind: &str,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), SignalError> {
    let addr = parse_bind_addr(bind)?;
    let listener = TcpListener::bind(&addr).await?;
    let bound = listener.local_addr()?;

    let app = router(controller);
    let handle = tokio::spawn(async move {
        info!(%bound, "control API listening");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            warn!(error = %e, "control API stopped with error");
        }
        debug!("control API shut down");
    });
    Ok((bound, handle))
}

/// Parses a bind address into `host:port` form.
///
/// Accepts:
/// - `:8080` → `0.0.0.0:8080`
/// - `8080` → `0.0.0.0:8080`
/// - `127.0.0.1:8080` → as-is
///
/// # Errors
///
/// Returns [`SignalError::Usage`] if the result is not a socket address.
pub fn parse_bind_addr(input: &str) -> Result<String, SignalError> {
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse::<SocketAddr>()
        .map_err(|e| SignalError::Usage(format!("invalid bind address \"{input}\": {e}")))?;
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SyncBackend};
    use crate::controller::{RetryPolicy, SessionSettings};
    use crate::observability::EventEmitter;
    use crate::signal::ControlPolicy;
    use crate::signal::intersection::seed_intersections;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::util::ServiceExt;

    async fn test_controller() -> Arc<Controller> {
        let settings = SessionSettings {
            // Long enough that no tick lands during a test.
            tick_interval: Duration::from_secs(3600),
            policy: ControlPolicy::default(),
            seeds: seed_intersections(),
            retry: RetryPolicy {
                max_retries: 0,
                backoff: Duration::from_millis(1),
            },
        };
        let backend: Arc<dyn SyncBackend> = Arc::new(MemoryBackend::new(seed_intersections()));
        Arc::new(
            Controller::start(
                settings,
                backend,
                Arc::new(EventEmitter::noop()),
                &CancellationToken::new(),
            )
            .await
            .unwrap(),
        )
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn parse_bind_addr_forms() {
        assert_eq!(parse_bind_addr(":8080").unwrap(), "0.0.0.0:8080");
        assert_eq!(parse_bind_addr("8080").unwrap(), "0.0.0.0:8080");
        assert_eq!(parse_bind_addr("127.0.0.1:9000").unwrap(), "127.0.0.1:9000");
        assert!(matches!(
            parse_bind_addr("not-an-address"),
            Err(SignalError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn list_includes_aspects() {
        let app = router(test_controller().await);
        let (status, body) = send(app, "GET", "/intersections").await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0]["id"], "1");
        assert_eq!(items[0]["currentPhase"], "green-ns");
        assert_eq!(items[0]["aspects"]["northSouth"], "green");
        assert_eq!(items[0]["aspects"]["eastWest"], "red");
    }

    #[tokio::test]
    async fn get_unknown_is_404() {
        let app = router(test_controller().await);
        let (status, body) = send(app, "GET", "/intersections/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("99"));
    }

    #[tokio::test]
    async fn action_applies_and_reports() {
        let controller = test_controller().await;
        let (status, body) =
            send(router(Arc::clone(&controller)), "POST", "/intersections/1/actions/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "paused");
        assert_eq!(body["applied"], true);

        let (status, body) = send(router(controller), "GET", "/intersections/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "paused");
    }

    #[tokio::test]
    async fn unknown_action_is_a_noop() {
        let app = router(test_controller().await);
        let (status, body) = send(app, "POST", "/intersections/2/actions/launch").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], false);
        assert_eq!(body["timeRemaining"], 12);
    }

    #[tokio::test]
    async fn action_on_unknown_intersection_is_404() {
        let app = router(test_controller().await);
        let (status, _) = send(app, "POST", "/intersections/42/actions/reset").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn emergency_all_stop() {
        let app = router(test_controller().await);
        let (status, body) = send(app, "POST", "/emergency/all-stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "all-stop");
        let affected = body["affected"].as_array().unwrap();
        assert_eq!(affected.len(), 3);
        for item in affected {
            assert_eq!(item["currentPhase"], "red-ns");
            assert_eq!(item["aspects"]["northSouth"], "red");
            assert_eq!(item["aspects"]["eastWest"], "red");
        }
        assert_eq!(body["skipped"], serde_json::json!(["3"]));
    }

    #[tokio::test]
    async fn unknown_emergency_is_400_with_suggestion() {
        let app = router(test_controller().await);
        let (status, body) = send(app, "POST", "/emergency/all-stpo").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("all-stop"));
    }

    #[tokio::test]
    async fn events_and_health_respond() {
        let controller = test_controller().await;
        let req = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let resp = router(Arc::clone(&controller)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"],
            "text/event-stream"
        );

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = router(controller).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
