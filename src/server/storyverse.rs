use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::services::guidance::{
    characters_prompt, ideas_prompt, overview_prompt, plot_prompt, world_prompt, AllStepData, StepData,
    SupportingCharacter,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/generate-ideas", post(generate_ideas))
        .route("/develop-characters", post(develop_characters))
        .route("/build-world", post(build_world))
        .route("/develop-plot", post(develop_plot))
        .route("/complete-overview", post(complete_overview))
        .route("/save-story", post(save_story))
        .route("/story/:story_id", get(get_story))
        .route("/stories", get(list_stories))
}

/// A wizard snapshot saved by the user.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedStory {
    pub id: String,
    pub data: Value,
    #[serde(default)]
    pub supporting_characters: Vec<SupportingCharacter>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A generated story bible together with the answers it was built from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRecord {
    pub id: String,
    pub all_data: AllStepData,
    pub supporting_characters: Vec<SupportingCharacter>,
    pub complete_overview: String,
    pub created_at: DateTime<Utc>,
}

/// Everything `/story/:storyId` and `/stories` can return. Saved snapshots
/// and generated overviews share one id space.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum StoryVerseRecord {
    Saved(SavedStory),
    Overview(OverviewRecord),
}

impl StoryVerseRecord {
    pub fn id(&self) -> &str {
        match self {
            StoryVerseRecord::Saved(s) => &s.id,
            StoryVerseRecord::Overview(o) => &o.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            StoryVerseRecord::Saved(s) => s.created_at,
            StoryVerseRecord::Overview(o) => o.created_at,
        }
    }

    fn step1_field(&self, key: &str) -> Option<String> {
        match self {
            StoryVerseRecord::Saved(s) => s
                .data
                .get("step1")
                .and_then(|step| step.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            StoryVerseRecord::Overview(o) => o.all_data.step1.get(key),
        }
    }

    pub fn title(&self) -> String {
        self.step1_field("reader-feeling")
            .unwrap_or_else(|| "Untitled Story".to_string())
    }

    pub fn genre(&self) -> String {
        self.step1_field("genre").unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GuidanceRequest {
    pub foundation_data: StepData,
    pub discovery_data: StepData,
    pub character_data: StepData,
    pub world_data: StepData,
    pub all_data: AllStepData,
    pub supporting_characters: Option<Vec<SupportingCharacter>>,
}

impl GuidanceRequest {
    fn cast(&self) -> &[SupportingCharacter] {
        self.supporting_characters.as_deref().unwrap_or_default()
    }
}

#[derive(Serialize)]
pub struct GuidanceResponse {
    pub content: String,
    #[serde(rename = "storyId", skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    pub status: &'static str,
}

async fn guidance(state: &AppState, prompt: String, failure: &str) -> ApiResult<String> {
    state.guide.generate_writing_guidance(&prompt).await.map_err(|e| {
        error!("{}: {}", failure, e);
        ApiError::internal(failure)
    })
}

fn success(content: String) -> Json<GuidanceResponse> {
    Json(GuidanceResponse {
        content,
        story_id: None,
        status: "success",
    })
}

/// A request without a JSON body means "nothing answered yet". A body that
/// is present but does not match the wizard's shape is rejected.
fn body(payload: Result<Json<GuidanceRequest>, JsonRejection>) -> ApiResult<GuidanceRequest> {
    match payload {
        Ok(Json(req)) => Ok(req),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(GuidanceRequest::default()),
        Err(rejection) => {
            warn!("Rejected guidance request: {}", rejection.body_text());
            Err(ApiError::bad_request(format!(
                "Invalid request body: {}",
                rejection.body_text()
            )))
        }
    }
}

async fn generate_ideas(
    State(state): State<AppState>,
    payload: Result<Json<GuidanceRequest>, JsonRejection>,
) -> ApiResult<Json<GuidanceResponse>> {
    let req = body(payload)?;
    info!("Generating story ideas");
    let prompt = ideas_prompt(&req.foundation_data, &req.discovery_data);
    Ok(success(guidance(&state, prompt, "Failed to generate story ideas").await?))
}

async fn develop_characters(
    State(state): State<AppState>,
    payload: Result<Json<GuidanceRequest>, JsonRejection>,
) -> ApiResult<Json<GuidanceResponse>> {
    let req = body(payload)?;
    info!("Developing characters");
    let prompt = characters_prompt(&req.foundation_data, &req.discovery_data, &req.character_data, req.cast());
    Ok(success(guidance(&state, prompt, "Failed to develop characters").await?))
}

async fn build_world(
    State(state): State<AppState>,
    payload: Result<Json<GuidanceRequest>, JsonRejection>,
) -> ApiResult<Json<GuidanceResponse>> {
    let req = body(payload)?;
    info!("Enhancing world-building");
    let prompt = world_prompt(&req.foundation_data, &req.discovery_data, &req.world_data);
    Ok(success(guidance(&state, prompt, "Failed to enhance world-building").await?))
}

async fn develop_plot(
    State(state): State<AppState>,
    payload: Result<Json<GuidanceRequest>, JsonRejection>,
) -> ApiResult<Json<GuidanceResponse>> {
    let req = body(payload)?;
    info!("Developing plot structure");
    let prompt = plot_prompt(&req.all_data);
    Ok(success(guidance(&state, prompt, "Failed to develop plot structure").await?))
}

async fn complete_overview(
    State(state): State<AppState>,
    payload: Result<Json<GuidanceRequest>, JsonRejection>,
) -> ApiResult<Json<GuidanceResponse>> {
    let req = body(payload)?;
    info!("Generating complete story guide");
    let prompt = overview_prompt(&req.all_data, req.cast());
    let content = guidance(&state, prompt, "Failed to generate complete story guide").await?;

    let all_data = req.all_data.clone();
    let supporting_characters = req.cast().to_vec();
    let overview = content.clone();
    let record = state
        .stories
        .create(Box::new(move |id| {
            StoryVerseRecord::Overview(OverviewRecord {
                id,
                all_data,
                supporting_characters,
                complete_overview: overview,
                created_at: Utc::now(),
            })
        }))
        .await;

    Ok(Json(GuidanceResponse {
        content,
        story_id: Some(record.id().to_string()),
        status: "success",
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveStoryRequest {
    pub story_data: Value,
    pub supporting_characters: Option<Vec<SupportingCharacter>>,
    pub timestamp: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStoryResponse {
    pub story_id: String,
    pub message: &'static str,
    pub status: &'static str,
}

async fn save_story(
    State(state): State<AppState>,
    payload: Option<Json<SaveStoryRequest>>,
) -> ApiResult<Json<SaveStoryResponse>> {
    let Json(req) = payload.ok_or_else(|| ApiError::bad_request("Story data is required"))?;
    let record = state
        .stories
        .create(Box::new(move |id| {
            StoryVerseRecord::Saved(SavedStory {
                id,
                data: req.story_data,
                supporting_characters: req.supporting_characters.unwrap_or_default(),
                timestamp: req.timestamp,
                created_at: Utc::now(),
            })
        }))
        .await;
    let story_id = record.id().to_string();

    let file_name = format!("story-{}.json", story_id);
    let written = match serde_json::to_vec_pretty(&record) {
        Ok(content) => state.storage.write(&file_name, &content).await,
        Err(e) => Err(e.into()),
    };
    let path = match written {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to write {}: {:#}", file_name, e);
            state.stories.remove(&story_id).await;
            return Err(ApiError::internal("Failed to save story"));
        }
    };
    info!("Saved StoryVerse story {} to {}", story_id, path);

    Ok(Json(SaveStoryResponse {
        story_id,
        message: "Story saved successfully",
        status: "success",
    }))
}

async fn get_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> ApiResult<Json<StoryVerseRecord>> {
    state
        .stories
        .get(&story_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Story not found"))
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub genre: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug)]
pub struct StoryList {
    pub stories: Vec<StorySummary>,
}

async fn list_stories(State(state): State<AppState>) -> Json<StoryList> {
    let stories = state
        .stories
        .list()
        .await
        .into_iter()
        .map(|s| StorySummary {
            id: s.id().to_string(),
            title: s.title(),
            genre: s.genre(),
            created_at: s.created_at(),
        })
        .collect();
    Json(StoryList { stories })
}
