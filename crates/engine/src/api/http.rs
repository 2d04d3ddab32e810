//! HTTP routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use genstream_domain::TaskId;
use genstream_shared::{CreateGeminiTaskRequest, CreateTaskResponse, TaskStateResponse};

use super::auth::Auth;
use super::error::ApiError;
use super::sse;
use crate::app::App;

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/tasks/gemini", post(create_task))
        .route("/api/tasks/gemini/{task_id}", get(get_task))
        .route("/api/tasks/gemini/{task_id}/sse", get(sse::stream_task))
}

async fn health() -> &'static str {
    "ok"
}

async fn create_task(
    State(app): State<Arc<App>>,
    Auth(user): Auth,
    body: Result<Json<CreateGeminiTaskRequest>, JsonRejection>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = body.into_task_request(user.to_uuid())?;

    let task_id = app.use_cases.submit.execute(request).await?;
    Ok(Json(CreateTaskResponse {
        task_id: task_id.to_uuid(),
    }))
}

async fn get_task(
    State(app): State<Arc<App>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskStateResponse>, ApiError> {
    let snapshot = app
        .use_cases
        .state
        .execute(TaskId::from_uuid(task_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::InProcessEventBus;
    use crate::infrastructure::ports::StateCachePort;
    use crate::infrastructure::state_cache::TtlStateCache;
    use crate::use_cases::tasks::test_support::memory_queue;
    use crate::use_cases::tasks::BridgeConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use genstream_domain::TaskSnapshot;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        cache: Arc<TtlStateCache>,
    }

    fn test_app() -> TestApp {
        let cache = Arc::new(TtlStateCache::new(Duration::from_secs(60)));
        let app = App::new(
            Arc::new(memory_queue(3)),
            cache.clone(),
            Arc::new(InProcessEventBus::new(16)),
            BridgeConfig {
                poll_interval: Duration::from_millis(20),
                event_buffer: 16,
            },
        );
        TestApp {
            router: routes().with_state(Arc::new(app)),
            cache,
        }
    }

    fn post_task(body: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/tasks/gemini")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_poll_task() {
        let app = test_app();
        let user = Uuid::new_v4().to_string();

        let response = app
            .router
            .clone()
            .oneshot(post_task(
                r#"{"prompt":"a castle","aspectRatio":"16:9","imageSize":"2K"}"#,
                Some(&user),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task_id = body_json(response).await["taskId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tasks/gemini/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "isDone": false, "text": null, "asset": null, "error": null })
        );
    }

    #[tokio::test]
    async fn create_requires_user_header() {
        let response = test_app()
            .router
            .oneshot(post_task(r#"{"prompt":"x"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_body_is_bad_request() {
        let user = Uuid::new_v4().to_string();
        for body in [
            r#"{"prompt":""}"#,
            r#"{"prompt":"x","aspectRatio":"7:3"}"#,
            r#"{"prompt":"x","unexpected":true}"#,
            "not json",
        ] {
            let response = test_app()
                .router
                .oneshot(post_task(body, Some(&user)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        }
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let response = test_app()
            .router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tasks/gemini/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sse_replays_terminal_task() {
        let app = test_app();
        let task_id = TaskId::new();
        app.cache
            .set(task_id, TaskSnapshot::succeeded(Some("hello".into()), None))
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tasks/gemini/{task_id}/sse"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = tokio::time::timeout(
            Duration::from_secs(2),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        let state_at = body.find("event: state").unwrap();
        let done_at = body.find("event: done").unwrap();
        assert!(state_at < done_at);
        assert!(body.contains(r#"data: {"asset":null,"text":"hello"}"#));
    }
}
