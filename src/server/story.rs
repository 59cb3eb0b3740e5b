use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::core::state::Story;
use crate::services::pipeline::{AudioResult, StatusReport, TransitionsResult, VisualsResult};
use crate::utils::files::is_servable_file_name;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;
use tower_http::services::ServeFile;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/generate-visuals/:story_id", post(generate_visuals))
        .route("/generate-audio/:story_id", post(generate_audio))
        .route("/generate-transitions/:story_id", post(generate_transitions))
        .route("/dialogue/:story_id", post(dialogue))
        .route("/status/:story_id", get(status))
        .route("/complete/:story_id", get(complete))
        .route("/files/:filename", get(file))
}

#[derive(Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub story_id: String,
    pub story: Story,
    pub status: &'static str,
}

async fn generate(
    State(state): State<AppState>,
    payload: Option<Json<GenerateRequest>>,
) -> ApiResult<Json<GenerateResponse>> {
    let prompt = payload
        .and_then(|Json(req)| req.prompt)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Story prompt is required"))?;

    let story = state
        .pipeline
        .generate_outline(&prompt)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to generate story outline"))?;

    Ok(Json(GenerateResponse {
        story_id: story.id.clone(),
        status: story.status.as_str(),
        story,
    }))
}

async fn generate_visuals(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<VisualsResult>> {
    let result = state
        .pipeline
        .generate_visuals(&story_id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to generate visuals"))?;
    Ok(Json(result))
}

async fn generate_audio(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<AudioResult>> {
    let result = state
        .pipeline
        .generate_audio(&story_id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to generate audio"))?;
    Ok(Json(result))
}

async fn generate_transitions(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<TransitionsResult>> {
    let result = state
        .pipeline
        .generate_transitions(&story_id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to generate transitions"))?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct DialogueRequest {
    pub character: String,
    pub text: String,
    #[serde(default)]
    pub chapter_index: usize,
    #[serde(default)]
    pub line_number: usize,
}

async fn dialogue(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    payload: Option<Json<DialogueRequest>>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload.ok_or_else(|| ApiError::bad_request("Character and text are required"))?;
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("Character and text are required"));
    }
    let audio = state
        .pipeline
        .speak_dialogue(&story_id, &req.character, &req.text, req.chapter_index, req.line_number)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to generate dialogue"))?;
    Ok(Json(json!({ "audio": audio })))
}

async fn status(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    let report = state
        .pipeline
        .status(&story_id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to read story status"))?;
    Ok(Json(report))
}

async fn complete(State(state): State<AppState>, Path(story_id): Path<String>) -> ApiResult<Json<Story>> {
    let story = state
        .pipeline
        .get(&story_id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, "Failed to read story"))?;
    Ok(Json(story))
}

async fn file(State(state): State<AppState>, Path(filename): Path<String>, request: Request) -> Response {
    if !is_servable_file_name(&filename) {
        warn!("Refused file request for {:?}", filename);
        return ApiError::forbidden("Access denied").into_response();
    }
    let path = state.storage.root().join(&filename);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return ApiError::not_found("File not found").into_response();
    }
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use crate::server::router;
    use crate::server::tests::{call, test_state};
    use anyhow::Result;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_story_status_is_404() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let app = router(test_state(temp_dir.path(), None), None);

        let (status, body) = call(&app, "GET", "/api/story/status/123", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Story not found" }));

        let (status, _) = call(&app, "GET", "/api/story/complete/123", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", "/api/story/generate-transitions/123", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Story or images not found");
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_prompt_is_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let app = router(test_state(temp_dir.path(), None), None);

        let (status, body) = call(&app, "POST", "/api/story/generate", Some(json!({ "prompt": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Story prompt is required");

        let (status, _) = call(&app, "POST", "/api/story/generate", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_routes_in_order() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let app = router(test_state(temp_dir.path(), None), None);

        let (status, body) = call(
            &app,
            "POST",
            "/api/story/generate",
            Some(json!({ "prompt": "A brave dragon learning to fly" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "outline_complete");
        assert_eq!(body["story"]["title"], "Ember Learns to Fly");
        let id = body["story_id"].as_str().unwrap_or_default().to_string();

        let (status, body) = call(&app, "POST", &format!("/api/story/generate-audio/{}", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap_or_default().contains("outline_complete"));

        let (status, body) = call(&app, "POST", &format!("/api/story/generate-visuals/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "visuals_complete");
        assert_eq!(body["chapter_images"].as_array().map(Vec::len), Some(5));

        let (_, body) = call(&app, "GET", &format!("/api/story/status/{}", id), None).await;
        assert_eq!(body["progress"], 70.0);
        assert_eq!(body["chapters_count"], 5);

        let (status, body) = call(&app, "POST", &format!("/api/story/generate-audio/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "audio_complete");
        assert!(body["outro_audio"].is_null());

        let (status, body) = call(&app, "POST", &format!("/api/story/generate-transitions/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "complete");
        assert_eq!(body["transition_videos"].as_array().map(Vec::len), Some(4));

        let (status, body) = call(&app, "GET", &format!("/api/story/complete/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["progress"], 100.0);
        assert_eq!(body["narration_audio"].as_array().map(Vec::len), Some(5));

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/story/dialogue/{}", id),
            Some(json!({ "character": "Pip", "text": "Flap harder!", "chapter_index": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["audio"], format!("{}_dialogue_Pip_1_0.mp3", id));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_route() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join("1_intro.mp3"), b"ID3")?;
        let app = router(test_state(temp_dir.path(), None), None);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/story/files/1_intro.mp3").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").and_then(|v| v.to_str().ok()),
            Some("audio/mpeg")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], b"ID3");

        let (status, body) = call(&app, "GET", "/api/story/files/2_intro.mp3", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "File not found");

        let (status, _) = call(&app, "GET", "/api/story/files/..%2Fsecret.png", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "GET", "/api/story/files/run.sh", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        Ok(())
    }
}
