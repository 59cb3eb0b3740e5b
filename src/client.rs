//! Command-line driver for a running server: requests each stage in order
//! while a background task polls the status endpoint.

use crate::core::state::Story;
use crate::services::pipeline::StatusReport;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub prompt: String,
    pub server: String,
    pub skip_audio: bool,
    pub skip_transitions: bool,
    pub poll_interval: Duration,
}

#[derive(Deserialize, Debug)]
struct GenerateReply {
    story_id: String,
}

#[derive(Clone)]
pub struct StoryClient {
    http: reqwest::Client,
    base: Url,
}

impl StoryClient {
    pub fn new(server: &str) -> Result<Self> {
        let mut base = Url::parse(server).with_context(|| format!("Invalid server URL: {}", server))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid endpoint {}", path))
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request.send().await.context("Request to storyforge server failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body["error"].as_str().unwrap_or("unknown error").to_string();
            return Err(anyhow!("Server returned {}: {}", status, message));
        }
        resp.json().await.context("Failed to parse server response")
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let url = self.endpoint(path)?;
        self.send(self.http.post(url).json(&body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        self.send(self.http.get(url)).await
    }

    pub async fn status(&self, story_id: &str) -> Result<StatusReport> {
        self.get(&format!("api/story/status/{}", story_id)).await
    }
}

/// Polls until progress reaches 100 or `stop` fires. Returns every progress value seen.
async fn poll_status(
    client: StoryClient,
    story_id: String,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) -> Vec<f64> {
    let mut seen = Vec::new();
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                match client.status(&story_id).await {
                    Ok(report) => {
                        info!("Story {}: {} ({:.0}%)", story_id, report.status, report.progress);
                        seen.push(report.progress);
                        if report.progress >= 100.0 {
                            break;
                        }
                    }
                    Err(e) => warn!("Status poll failed: {:#}", e),
                }
            }
        }
    }
    seen
}

/// Runs every requested stage for a new story and returns the final record.
pub async fn run_create(options: &CreateOptions) -> Result<Story> {
    let client = StoryClient::new(&options.server)?;

    info!("Requesting outline for: {}", options.prompt);
    let reply: GenerateReply = client
        .post("api/story/generate", json!({ "prompt": options.prompt }))
        .await?;
    let id = reply.story_id;

    let (stop_tx, stop_rx) = oneshot::channel();
    let poller = tokio::spawn(poll_status(client.clone(), id.clone(), options.poll_interval, stop_rx));

    let stages = run_stages(&client, &id, options).await;
    let _ = stop_tx.send(());
    if let Ok(seen) = poller.await {
        if seen.windows(2).any(|w| w[1] < w[0]) {
            warn!("Progress went backwards: {:?}", seen);
        }
    }
    stages?;

    client.get(&format!("api/story/complete/{}", id)).await
}

async fn run_stages(client: &StoryClient, id: &str, options: &CreateOptions) -> Result<()> {
    let _: Value = client
        .post(&format!("api/story/generate-visuals/{}", id), json!({}))
        .await?;
    if options.skip_audio {
        if !options.skip_transitions {
            warn!("Transitions need narration first, skipping them too");
        }
        return Ok(());
    }
    let _: Value = client
        .post(&format!("api/story/generate-audio/{}", id), json!({}))
        .await?;
    if !options.skip_transitions {
        let _: Value = client
            .post(&format!("api/story/generate-transitions/{}", id), json!({}))
            .await?;
    }
    Ok(())
}

fn slot(path: &Option<String>) -> &str {
    path.as_deref().unwrap_or("(not generated)")
}

/// Plain-text rendering of a finished story for the terminal.
pub fn render_summary(story: &Story) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} [{}] {:.0}%", story.title, story.status, story.progress);
    let _ = writeln!(out);
    let _ = writeln!(out, "Characters:");
    for character in &story.characters {
        let image = story
            .character_images
            .as_ref()
            .and_then(|images| images.get(&character.name))
            .cloned()
            .flatten();
        let _ = writeln!(out, "  - {}: {} ({})", character.name, character.description, slot(&image));
    }
    if let Some(intro) = &story.intro_audio {
        let _ = writeln!(out, "\nIntroduction: {}", intro);
    }
    for (i, chapter) in story.chapters.iter().enumerate() {
        let _ = writeln!(out, "\nChapter {}: {}", i + 1, chapter.title);
        let _ = writeln!(out, "  {}", chapter.narrative_text);
        if let Some(images) = &story.chapter_images {
            let _ = writeln!(out, "  Image: {}", slot(images.get(i).unwrap_or(&None)));
        }
        if let Some(audio) = &story.narration_audio {
            let _ = writeln!(out, "  Narration: {}", slot(audio.get(i).unwrap_or(&None)));
        }
        if let Some(videos) = &story.transition_videos {
            if let Some(video) = videos.get(i) {
                let _ = writeln!(out, "  Transition: {}", slot(video));
            }
        }
    }
    if let Some(outro) = &story.outro_audio {
        let _ = writeln!(out, "\nConclusion: {}", outro);
    }
    out
}
