//! 提交和查看任务的网页前端。

mod page;

use crate::error::VideoError;
use crate::queue::{JobId, JobQueue, JobStatus};
use crate::story::StoryMode;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiState {
    queue: JobQueue,
}

impl ApiState {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub topic: String,
    #[serde(default)]
    pub mode: StoryMode,
}

/// JSON 接口返回的错误
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(e: VideoError) -> Self {
        let status = match e {
            VideoError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VideoError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/video", get(get_video))
        .with_state(state)
}

/// 监听地址，一直服务到进程退出
pub async fn serve(state: ApiState, bind: &str) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Web front-end listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(page::INDEX_HTML)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn submit_job(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.queue.submit(&request.topic, request.mode)?;
    Ok((StatusCode::ACCEPTED, Json(json!({"id": id}))))
}

async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.queue.list())
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .queue
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("No job {}", id)))
}

async fn get_video(
    State(state): State<ApiState>,
    Path(id): Path<JobId>,
) -> Result<Response, ApiError> {
    let job = state
        .queue
        .get(id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("No job {}", id)))?;

    let output = match (job.status, job.output) {
        (JobStatus::Completed, Some(output)) => output,
        _ => {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                format!("Job {} has not completed", id),
            ))
        }
    };

    let bytes = tokio::fs::read(&output).await.map_err(|e| {
        warn!("Cannot read {}: {}", output.display(), e);
        ApiError::new(StatusCode::NOT_FOUND, "Video file is missing")
    })?;
    Ok(([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::fakes;
    use crate::queue::QueueOptions;
    use std::sync::Arc;
    use std::time::Duration;

    fn options(root: &std::path::Path) -> QueueOptions {
        QueueOptions {
            work_root: root.join("jobs"),
            output_root: root.join("videos"),
            retain_finished: 100,
        }
    }

    fn state(root: &std::path::Path) -> ApiState {
        let (pipeline, _fakes) = fakes::pipeline(AppConfig::default());
        let queue = JobQueue::start(Arc::new(pipeline), 1, 4, options(root));
        ApiState::new(queue)
    }

    /// 任务永远停在第一步，通道容量为 1
    fn stuck_state(root: &std::path::Path) -> ApiState {
        let queue = JobQueue::start(Arc::new(fakes::stuck_pipeline()), 1, 1, options(root));
        ApiState::new(queue)
    }

    async fn submit(state: &ApiState, topic: &str) -> Response {
        let request = SubmitRequest {
            topic: topic.to_string(),
            mode: StoryMode::Food,
        };
        match submit_job(State(state.clone()), Json(request)).await {
            Ok(r) => r.into_response(),
            Err(e) => e.into_response(),
        }
    }

    #[tokio::test]
    async fn submit_accepts_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        assert_eq!(submit(&state, "gyoza").await.status(), StatusCode::ACCEPTED);
        assert_eq!(submit(&state, "").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.queue.list().len(), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let id = uuid::Uuid::new_v4();

        let job = get_job(State(state.clone()), Path(id)).await;
        assert_eq!(job.err().map(|e| e.status), Some(StatusCode::NOT_FOUND));

        let video = get_video(State(state), Path(id)).await;
        assert_eq!(video.err().map(|e| e.status), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn video_is_served_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let id = state.queue.submit("onigiri", StoryMode::Food).unwrap();

        for _ in 0..500 {
            if state.queue.get(id).map(|j| j.status) == Some(JobStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = get_video(State(state), Path(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
    }

    #[tokio::test]
    async fn submit_request_defaults_to_food() {
        let request: SubmitRequest = serde_json::from_str(r#"{"topic": "mochi"}"#).unwrap();
        assert_eq!(request.mode, StoryMode::Food);
        let request: SubmitRequest =
            serde_json::from_str(r#"{"topic": "office", "mode": "comedy"}"#).unwrap();
        assert_eq!(request.mode, StoryMode::Comedy);
    }

    #[tokio::test]
    async fn health() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_queue_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = stuck_state(dir.path());

        let mut statuses = Vec::new();
        for i in 0..3 {
            statuses.push(submit(&state, &format!("dish {}", i)).await.status());
        }
        assert_eq!(statuses[0], StatusCode::ACCEPTED);
        assert!(statuses.contains(&StatusCode::SERVICE_UNAVAILABLE));
        let accepted = statuses.iter().filter(|s| **s == StatusCode::ACCEPTED).count();
        assert_eq!(state.queue.list().len(), accepted);
    }

    #[tokio::test]
    async fn unfinished_video_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let state = stuck_state(dir.path());
        let id = state.queue.submit("takoyaki", StoryMode::Food).unwrap();

        // 刚提交时还在排队
        let queued = get_video(State(state.clone()), Path(id)).await;
        assert_eq!(queued.err().map(|e| e.status), Some(StatusCode::CONFLICT));

        for _ in 0..500 {
            if state.queue.get(id).map(|j| j.status) == Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.queue.get(id).map(|j| j.status), Some(JobStatus::Running));
        let running = get_video(State(state), Path(id)).await;
        assert_eq!(running.err().map(|e| e.status), Some(StatusCode::CONFLICT));
    }
}
