//! HTTP surface: the story pipeline under `/api/story`, the StoryVerse
//! wizard under `/api/storyverse`, and the static frontend for everything else.

use crate::core::config::{Config, FallbackMode};
use crate::core::io::{NativeStorage, Storage};
use crate::core::state::Story;
use crate::core::store::{InMemoryStore, RecordStore};
use crate::services::fal::FalClient;
use crate::services::guidance::GuidanceWriter;
use crate::services::imagery::Illustrator;
use crate::services::llm::GeminiClient;
use crate::services::outline::{DemoStoryFallback, NoFallback, OutlineFallback, OutlineGenerator};
use crate::services::pipeline::StoryPipeline;
use crate::services::tts::ElevenLabsClient;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

pub mod error;
pub mod story;
pub mod storyverse;

use storyverse::StoryVerseRecord;

const BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<StoryPipeline>,
    pub guide: Arc<GuidanceWriter>,
    pub storage: Arc<dyn Storage>,
    pub stories: Arc<dyn RecordStore<StoryVerseRecord>>,
}

impl AppState {
    /// Wires the vendor clients described by `config` into a pipeline.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.output_folder));
        let gemini = Arc::new(GeminiClient::new(&config.gemini, http.clone()));
        let fal = Arc::new(FalClient::new(&config.fal, http.clone(), storage.clone()));
        let narrator = Arc::new(ElevenLabsClient::new(&config.elevenlabs, http, storage.clone()));

        let fallback: Box<dyn OutlineFallback> = match config.fallback {
            FallbackMode::Demo => Box::new(DemoStoryFallback),
            FallbackMode::None => Box::new(NoFallback),
        };
        let ttl = config.store_ttl_seconds.map(Duration::from_secs);

        let pipeline = StoryPipeline::new(
            Arc::new(InMemoryStore::<Story>::with_ttl(ttl)),
            OutlineGenerator::new(gemini.clone(), fallback),
            Arc::new(Illustrator::new(gemini.clone(), storage.clone())),
            fal.clone(),
            narrator,
            fal,
        )
        .with_transition_timeout(Duration::from_secs(config.transition_timeout_seconds));

        Ok(Self {
            pipeline: Arc::new(pipeline),
            guide: Arc::new(GuidanceWriter::new(gemini)),
            storage,
            stories: Arc::new(InMemoryStore::<StoryVerseRecord>::with_ttl(ttl)),
        })
    }
}

pub fn router(state: AppState, public_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .nest("/api/story", story::routes())
        .nest("/api/storyverse", storyverse::routes())
        .with_state(state);

    let app = match public_dir {
        Some(dir) if dir.is_dir() => {
            // Unknown paths get the app shell so client-side routes survive a reload.
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(dir).fallback(index))
        }
        _ => api,
    };
    app.layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
}

pub async fn start_server(config: &Config) -> Result<()> {
    config.ensure_directories()?;
    let state = AppState::from_config(config)?;
    let app = router(state, Some(PathBuf::from(&config.public_folder)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Storyforge listening on http://127.0.0.1:{}", config.port);
    info!("Generated media is written to {}", config.output_folder);

    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::llm::LlmClient;
    use crate::services::pipeline::tests::{demo_pipeline, MockIllustrator, MockRenderer};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[derive(Debug)]
    pub(crate) struct CannedLlm(pub Option<&'static str>);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            self.0.map(str::to_string).ok_or_else(|| anyhow!("503 from vendor"))
        }
    }

    pub(crate) fn test_state(root: &std::path::Path, guidance: Option<&'static str>) -> AppState {
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(root));
        let pipeline = demo_pipeline(
            Arc::new(InMemoryStore::<Story>::new()),
            Arc::new(MockIllustrator::default()),
            Arc::new(MockRenderer::default()),
        );
        AppState {
            pipeline: Arc::new(pipeline),
            guide: Arc::new(GuidanceWriter::new(Arc::new(CannedLlm(guidance)))),
            storage,
            stories: Arc::new(InMemoryStore::<StoryVerseRecord>::new()),
        }
    }

    pub(crate) async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_public_dir_is_served_as_fallback() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let public = temp_dir.path().join("public");
        std::fs::create_dir_all(&public)?;
        std::fs::write(public.join("index.html"), "<h1>Storyforge</h1>")?;

        let app = router(test_state(temp_dir.path(), None), Some(public));
        let response = app
            .oneshot(Request::builder().uri("/index.html").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], b"<h1>Storyforge</h1>");
        Ok(())
    }

    #[tokio::test]
    async fn test_deep_link_gets_index_html() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let public = temp_dir.path().join("public");
        std::fs::create_dir_all(&public)?;
        std::fs::write(public.join("index.html"), "<h1>Storyforge</h1>")?;

        let app = router(test_state(temp_dir.path(), None), Some(public));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/storyverse/step/3").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], b"<h1>Storyforge</h1>");

        // API misses are still JSON errors, not the shell.
        let (status, body) = call(&app, "GET", "/api/story/status/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Story not found");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_path_without_public_dir() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let app = router(test_state(temp_dir.path(), None), None);
        let (status, _) = call(&app, "GET", "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }
}
