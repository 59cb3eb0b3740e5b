use crate::core::io::Storage;
use crate::utils::files::png_data_uri;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Post-processes an existing image. Always yields a usable path: the
/// original one when enhancement is not possible.
#[async_trait]
pub trait ImageEnhancer: Send + Sync {
    async fn enhance_image(&self, image_path: &str, description: &str) -> String;
}

/// Short clip bridging two chapter images.
#[async_trait]
pub trait TransitionRenderer: Send + Sync {
    async fn create_video_transition(
        &self,
        story_id: &str,
        from_image: &str,
        to_image: &str,
        index: usize,
    ) -> Option<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FalConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_fal_base_url")]
    pub base_url: String,
    #[serde(default = "default_enhance_model")]
    pub enhance_model: String,
    #[serde(default = "default_video_model")]
    pub video_model: String,
}

fn default_fal_base_url() -> String {
    "https://fal.run".to_string()
}
fn default_enhance_model() -> String {
    "fal-ai/flux-pro/v1.1-ultra".to_string()
}
fn default_video_model() -> String {
    "fal-ai/kling-video/v1/standard/image-to-video".to_string()
}

impl Default for FalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_fal_base_url(),
            enhance_model: default_enhance_model(),
            video_model: default_video_model(),
        }
    }
}

#[derive(Deserialize)]
struct FalFile {
    url: String,
}

#[derive(Deserialize)]
struct FalImageResult {
    #[serde(default)]
    images: Vec<FalFile>,
}

#[derive(Deserialize)]
struct FalVideoResult {
    video: Option<FalFile>,
}

pub struct FalClient {
    config: FalConfig,
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
}

impl FalClient {
    pub fn new(config: &FalConfig, client: reqwest::Client, storage: Arc<dyn Storage>) -> Self {
        Self {
            config: config.clone(),
            client,
            storage,
        }
    }

    async fn run<T: for<'de> Deserialize<'de>>(&self, model: &str, input: serde_json::Value) -> Result<T> {
        if self.config.api_key.is_empty() {
            return Err(anyhow!("fal.ai key is not configured"));
        }
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), model);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.config.api_key))
            .json(&input)
            .send()
            .await
            .context("fal.ai request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_text = resp.text().await?;
            return Err(anyhow!("fal.ai API error ({}): {}", status, err_text));
        }
        resp.json().await.context("Failed to parse fal.ai response")
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Download of {} failed: {}", url, resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn try_enhance(&self, image_path: &str, description: &str) -> Result<String> {
        let image = self.storage.read(image_path).await?;
        let input = json!({
            "image_url": png_data_uri(&image),
            "prompt": format!(
                "Enhance and improve this image: {}. Make it more cinematic, detailed, and visually striking.",
                description
            ),
            "guidance_scale": 3.5,
            "num_inference_steps": 28,
            "safety_tolerance": 2
        });

        let result: FalImageResult = self.run(&self.config.enhance_model, input).await?;
        let first = result
            .images
            .first()
            .ok_or_else(|| anyhow!("fal.ai returned no enhanced image"))?;
        let bytes = self.download(&first.url).await?;
        self.storage.write(&enhanced_file_name(image_path), &bytes).await
    }

    async fn try_transition(&self, story_id: &str, from_image: &str, index: usize) -> Result<String> {
        let image = self.storage.read(from_image).await?;
        let input = json!({
            "image_url": png_data_uri(&image),
            "prompt": "Smooth cinematic transition, gentle camera movement, maintain scene consistency, 5 seconds",
            "duration": "5",
            "aspect_ratio": "16:9"
        });

        let result: FalVideoResult = self.run(&self.config.video_model, input).await?;
        let video = result.video.ok_or_else(|| anyhow!("No video generated"))?;
        let bytes = self.download(&video.url).await?;
        self.storage
            .write(&format!("{}_transition_{}.mp4", story_id, index), &bytes)
            .await
    }
}

/// `dir/name.png` becomes `name_enhanced.png`.
pub fn enhanced_file_name(image_path: &str) -> String {
    let path = Path::new(image_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    format!("{}_enhanced.png", stem)
}

#[async_trait]
impl ImageEnhancer for FalClient {
    async fn enhance_image(&self, image_path: &str, description: &str) -> String {
        match self.try_enhance(image_path, description).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Image enhancement failed, keeping original {}: {:#}", image_path, e);
                image_path.to_string()
            }
        }
    }
}

#[async_trait]
impl TransitionRenderer for FalClient {
    async fn create_video_transition(
        &self,
        story_id: &str,
        from_image: &str,
        to_image: &str,
        index: usize,
    ) -> Option<String> {
        match self.try_transition(story_id, from_image, index).await {
            Ok(path) => {
                info!("Transition {} ({} -> {}) saved to {}", index, from_image, to_image, path);
                Some(path)
            }
            Err(e) => {
                warn!("Video transition {} failed: {:#}", index, e);
                None
            }
        }
    }
}
