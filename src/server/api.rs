use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use crate::board::{
    DbHandle, MoveCoordinator, MoveRequest, PositionAllocator, ProjectStore, Stores, TaskStatus,
    WipDecision, WipLimits, WipViolation,
};
use crate::config::CardflowConfig;
use crate::errors::BoardError;
use crate::events::{
    BroadcastSink, CreateSubscriptionRequest, EventDispatcher, EventReceiver, PushSink,
    Subscription, SubscriptionPatch, SubscriptionRegistry,
};

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

/// Envelopes buffered per WebSocket connection before it starts lagging.
const PUSH_CAPACITY: usize = 256;

pub struct AppState {
    pub db: DbHandle,
    pub coordinator: MoveCoordinator,
    pub dispatcher: EventDispatcher,
    pub push: BroadcastSink,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the board core and event pipeline over `db`. Spawns the
    /// dispatcher's workers, so it must run inside a tokio runtime.
    pub async fn new(db: DbHandle, config: &CardflowConfig) -> Self {
        let stores = Stores::from_single(Arc::new(db.clone()));
        let registry = Arc::new(SubscriptionRegistry::new(
            stores.users.clone(),
            stores.projects.clone(),
            config.subscriptions,
        ));
        let dispatcher = EventDispatcher::start(registry, config.events);
        let push = BroadcastSink::new(PUSH_CAPACITY);
        dispatcher.register_sink(Arc::new(push.clone())).await;

        let coordinator = MoveCoordinator::new(&stores, PositionAllocator::new(config.positions))
            .with_settings(config.moves)
            .with_dispatcher(dispatcher.clone());

        Self {
            db,
            coordinator,
            dispatcher,
            push,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────

pub enum ApiError {
    Board(BoardError),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        Self::Board(err)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a WipViolation>,
}

pub fn status_for(err: &BoardError) -> StatusCode {
    use crate::errors::ErrorKind;
    match err {
        BoardError::SubscriptionLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        BoardError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Board(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "Request failed");
                }
                let body = ErrorBody {
                    error: err.to_string(),
                    kind: err.kind().as_str(),
                    details: err.wip_violation(),
                };
                (status, Json(body)).into_response()
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": msg, "kind": "validation"})),
            )
                .into_response(),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": msg, "kind": "authorization"})),
            )
                .into_response(),
            ApiError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": msg, "kind": "authorization"})),
            )
                .into_response(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks/{id}/move", patch(move_task))
        .route(
            "/api/projects/{id}/columns/{column}/wip",
            get(get_wip).put(set_wip),
        )
        .route(
            "/api/subscriptions",
            post(create_subscription).get(list_subscriptions),
        )
        .route(
            "/api/subscriptions/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route("/api/stats", get(stats))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

pub(crate) fn actor(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", USER_HEADER)))
}

/// The acting user, after checking they can see `project_id`.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    project_id: &str,
) -> Result<String, ApiError> {
    let user_id = actor(headers)?;
    let project = ProjectStore::get_by_id(&state.db, project_id)
        .await?
        .ok_or_else(|| BoardError::ProjectNotFound {
            id: project_id.to_string(),
        })?;
    if !project.has_access(&user_id) {
        return Err(BoardError::AccessDenied {
            user_id,
            project_id: project.id,
        }
        .into());
    }
    Ok(user_id)
}

/// The acting user, who must be `owner`. Subscriptions are only ever
/// managed by the user they belong to.
pub(crate) fn require_owner(headers: &HeaderMap, owner: &str) -> Result<String, ApiError> {
    let user_id = actor(headers)?;
    if user_id != owner {
        return Err(ApiError::Forbidden(format!(
            "{} cannot act on behalf of {}",
            user_id, owner
        )));
    }
    Ok(user_id)
}

/// Fetch a subscription the acting user owns.
async fn owned_subscription(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<Subscription, ApiError> {
    let actor = actor(headers)?;
    let subscription = state.dispatcher.registry().get(id).await?;
    if subscription.user_id != actor {
        return Err(ApiError::Forbidden(format!(
            "subscription {} belongs to another user",
            id
        )));
    }
    Ok(subscription)
}

fn parse_column(column: &str) -> Result<TaskStatus, ApiError> {
    TaskStatus::from_str(column).map_err(ApiError::BadRequest)
}

/// Relay a subscription's events to its owner's push connections until the
/// subscription goes away.
fn spawn_subscription_relay(push: BroadcastSink, user_id: String, mut events: EventReceiver) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let payload = match serde_json::to_value(event.as_ref()) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(event_id = %event.event_id, error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if let Err(e) = push.send_to_user(&user_id, event.event_type, &payload).await {
                tracing::trace!(user_id = %user_id, error = %e, "No push connection for user");
            }
        }
    });
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn move_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut req): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor(&headers)?;
    if !req.task_id.is_empty() && req.task_id != id {
        return Err(ApiError::BadRequest(
            "taskId in body does not match the URL".into(),
        ));
    }
    req.task_id = id;
    let outcome = state.coordinator.move_task(&actor, &req).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WipStatus {
    pub project_id: String,
    pub column: TaskStatus,
    pub limits: WipLimits,
    /// Set when one more card would be refused.
    pub violation: Option<WipViolation>,
}

async fn wip_status(
    state: &AppState,
    project_id: String,
    column: TaskStatus,
) -> Result<WipStatus, ApiError> {
    let gate = state.coordinator.wip_gate();
    let limits = gate.limits_for(&project_id, column).await?;
    let violation = match gate.validate(&project_id, column).await? {
        WipDecision::Ok => None,
        WipDecision::SoftViolation(v) | WipDecision::HardViolation(v) => Some(v),
    };
    Ok(WipStatus {
        project_id,
        column,
        limits,
        violation,
    })
}

async fn get_wip(
    State(state): State<SharedState>,
    Path((project_id, column)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let column = parse_column(&column)?;
    authorize(&state, &headers, &project_id).await?;
    Ok(Json(wip_status(&state, project_id, column).await?))
}

async fn set_wip(
    State(state): State<SharedState>,
    Path((project_id, column)): Path<(String, String)>,
    headers: HeaderMap,
    Json(limits): Json<WipLimits>,
) -> Result<impl IntoResponse, ApiError> {
    let column = parse_column(&column)?;
    authorize(&state, &headers, &project_id).await?;
    state
        .coordinator
        .wip_gate()
        .set_limits(&project_id, column, limits)
        .await?;
    Ok(Json(wip_status(&state, project_id, column).await?))
}

async fn create_subscription(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_owner(&headers, &req.user_id)?;
    let handle = state.dispatcher.subscribe(req).await?;
    spawn_subscription_relay(
        state.push.clone(),
        handle.subscription.user_id.clone(),
        handle.events,
    );
    Ok((StatusCode::CREATED, Json(handle.subscription)))
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    /// Defaults to the acting user.
    pub user_id: Option<String>,
}

async fn list_subscriptions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = match query.user_id {
        Some(user_id) => require_owner(&headers, &user_id)?,
        None => actor(&headers)?,
    };
    Ok(Json(state.dispatcher.list_by_user(&user_id).await))
}

async fn get_subscription(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(owned_subscription(&state, &headers, &id).await?))
}

async fn update_subscription(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<SubscriptionPatch>,
) -> Result<impl IntoResponse, ApiError> {
    owned_subscription(&state, &headers, &id).await?;
    Ok(Json(state.dispatcher.registry().update(&id, patch).await?))
}

async fn delete_subscription(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    owned_subscription(&state, &headers, &id).await?;
    if state.dispatcher.unsubscribe(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(BoardError::SubscriptionNotFound { id }.into())
    }
}

async fn stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "dispatcher": state.dispatcher.stats(),
        "subscriptions": state.dispatcher.registry().len().await,
        "pushConnections": state.push.active_connection_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardDb, Task};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        state: SharedState,
    }

    async fn fixture() -> Fixture {
        let db = BoardDb::new_in_memory().unwrap();
        db.create_user("alice", "Alice").unwrap();
        db.create_user("bob", "Bob").unwrap();
        db.create_project("p1", "Board", "alice", true).unwrap();
        for (id, status, position) in [
            ("t1", TaskStatus::Todo, 1000),
            ("t2", TaskStatus::Todo, 2000),
            ("d1", TaskStatus::Developing, 1000),
        ] {
            db.insert_task(&Task::new(id, "p1", id.to_uppercase(), status, position))
                .unwrap();
        }
        let state = Arc::new(AppState::new(DbHandle::new(db), &CardflowConfig::default()).await);
        Fixture {
            app: api_router().with_state(state.clone()),
            state,
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, user: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let f = fixture().await;
        let response = f
            .app
            .oneshot(empty_request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_move_task() {
        let f = fixture().await;
        let response = f
            .app
            .oneshot(json_request(
                "PATCH",
                "/api/tasks/t1/move",
                Some("alice"),
                serde_json::json!({"projectId": "p1", "newStatus": "developing", "newPosition": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(outcome["task"]["status"], "developing");
        assert_eq!(outcome["task"]["position"], 2000);
        assert_eq!(outcome["fromStatus"], "todo");
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_move_requires_user_header() {
        let f = fixture().await;
        let response = f
            .app
            .oneshot(json_request(
                "PATCH",
                "/api/tasks/t1/move",
                None,
                serde_json::json!({"projectId": "p1", "newStatus": "developing"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_move_error_mapping() {
        let f = fixture().await;
        let cases = [
            ("bob", "t1", "developing", StatusCode::FORBIDDEN),
            ("alice", "missing", "developing", StatusCode::NOT_FOUND),
            ("alice", "t1", "complete", StatusCode::CONFLICT),
            ("alice", "t1", "doing", StatusCode::BAD_REQUEST),
        ];
        for (user, task, status, expected) in cases {
            let response = f
                .app
                .clone()
                .oneshot(json_request(
                    "PATCH",
                    &format!("/api/tasks/{}/move", task),
                    Some(user),
                    serde_json::json!({"projectId": "p1", "newStatus": status}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{} moving {} to {}", user, task, status);
        }
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_soft_wip_violation_carries_details() {
        let f = fixture().await;
        let response = f
            .app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/projects/p1/columns/developing/wip",
                Some("alice"),
                serde_json::json!({"softLimit": 1, "hardLimit": 5, "enabled": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(status["limits"]["softLimit"], 1);
        assert_eq!(status["violation"]["overrideAvailable"], true);

        let response = f
            .app
            .oneshot(json_request(
                "PATCH",
                "/api/tasks/t1/move",
                Some("alice"),
                serde_json::json!({"projectId": "p1", "newStatus": "developing"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["details"]["currentCount"], 1);
        assert_eq!(body["details"]["overrideAvailable"], true);
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_wip_defaults_and_access() {
        let f = fixture().await;
        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", "/api/projects/p1/columns/review/wip", Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: WipStatus = body_json(response.into_body()).await;
        assert_eq!(status.limits, WipLimits::defaults_for(TaskStatus::Review));
        assert!(status.violation.is_none());

        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", "/api/projects/p1/columns/review/wip", Some("bob")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = f
            .app
            .oneshot(empty_request("GET", "/api/projects/p1/columns/doing/wip", Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let f = fixture().await;
        let response = f
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/subscriptions",
                Some("alice"),
                serde_json::json!({"userId": "alice", "projectId": "p1", "eventTypes": ["moved"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = body_json(response.into_body()).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["active"], true);

        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", "/api/subscriptions?user_id=alice", Some("alice")))
            .await
            .unwrap();
        let listed: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(listed.len(), 1);

        let response = f
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/api/subscriptions/{}", id),
                Some("alice"),
                serde_json::json!({"eventTypes": ["moved", "created"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(updated["event_types"].as_array().unwrap().len(), 2);

        let uri = format!("/api/subscriptions/{}", id);
        let response = f
            .app
            .clone()
            .oneshot(empty_request("DELETE", &uri, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", &uri, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = f
            .app
            .oneshot(empty_request("DELETE", &uri, Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_rejections() {
        let f = fixture().await;
        let cases = [
            ("alice", serde_json::json!({"userId": "alice", "eventTypes": []}), StatusCode::BAD_REQUEST),
            ("ghost", serde_json::json!({"userId": "ghost", "eventTypes": ["moved"]}), StatusCode::NOT_FOUND),
            (
                "bob",
                serde_json::json!({"userId": "bob", "projectId": "p1", "eventTypes": ["moved"]}),
                StatusCode::FORBIDDEN,
            ),
        ];
        for (user, body, expected) in cases {
            let response = f
                .app
                .clone()
                .oneshot(json_request("POST", "/api/subscriptions", Some(user), body))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }

        for _ in 0..10 {
            let response = f
                .app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/subscriptions",
                    Some("bob"),
                    serde_json::json!({"userId": "bob", "eventTypes": ["moved"]}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }
        let response = f
            .app
            .oneshot(json_request(
                "POST",
                "/api/subscriptions",
                Some("bob"),
                serde_json::json!({"userId": "bob", "eventTypes": ["moved"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        f.state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriptions_require_matching_user_header() {
        let f = fixture().await;
        let body = serde_json::json!({"userId": "alice", "eventTypes": ["moved"]});

        let response = f
            .app
            .clone()
            .oneshot(json_request("POST", "/api/subscriptions", None, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = f
            .app
            .clone()
            .oneshot(json_request("POST", "/api/subscriptions", Some("bob"), body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(f.state.dispatcher.list_by_user("alice").await.is_empty());

        let response = f
            .app
            .clone()
            .oneshot(json_request("POST", "/api/subscriptions", Some("alice"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = body_json(response.into_body()).await;
        let uri = format!("/api/subscriptions/{}", created["id"].as_str().unwrap());

        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", "/api/subscriptions?user_id=alice", Some("bob")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = f
            .app
            .clone()
            .oneshot(empty_request("GET", "/api/subscriptions", Some("bob")))
            .await
            .unwrap();
        let listed: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(listed.is_empty());

        for method in ["GET", "DELETE"] {
            let response = f
                .app
                .clone()
                .oneshot(empty_request(method, &uri, Some("bob")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
        let response = f
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &uri,
                Some("bob"),
                serde_json::json!({"active": false}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert_eq!(f.state.dispatcher.list_by_user("alice").await.len(), 1);
        f.state.dispatcher.shutdown().await;
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&BoardError::QueueFull { waited_ms: 5000 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&BoardError::VersionConflict {
                task_id: "t".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&BoardError::LockPoisoned),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
