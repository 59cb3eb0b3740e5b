use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

/// Image generation conditioned on a prompt and an optional reference image.
#[async_trait]
pub trait ImageModel: Send + Sync + Debug {
    async fn render(&self, prompt: &str, reference_png: Option<&[u8]>) -> Result<Vec<u8>>;
}

/// Returned (inside `anyhow::Error`) when a vendor answers HTTP 429.
#[derive(Debug, thiserror::Error)]
#[error("{vendor} rate limit hit: {body}")]
pub struct RateLimited {
    pub vendor: &'static str,
    pub body: String,
}

pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RateLimited>().is_some()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

fn default_text_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            base_url: default_gemini_base_url(),
        }
    }
}

// --- Gemini ---
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, client: reqwest::Client) -> Self {
        Self {
            api_key: config.api_key.clone(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn generate(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        if self.api_key.is_empty() {
            return Err(anyhow!("Gemini API key is not configured"));
        }
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(RateLimited { vendor: "Gemini", body }.into());
        }
        if !status.is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
        })?;

        if let Some(err) = &result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }
        Ok(result)
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Inline { inline_data: GeminiBlob },
}

#[derive(Serialize)]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<GeminiBlobResponse>,
}

#[derive(Deserialize)]
struct GeminiBlobResponse {
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn first_candidate(&self) -> Result<&GeminiCandidate> {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))
    }

    fn text(&self) -> Result<String> {
        let first = self.first_candidate()?;
        let text: String = first
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }

    fn first_image(&self) -> Result<Vec<u8>> {
        let first = self.first_candidate()?;
        let blob = first
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.inline_data.as_ref())
            .ok_or_else(|| anyhow!("No image generated"))?;
        BASE64
            .decode(blob.data.as_bytes())
            .context("Gemini returned invalid base64 image data")
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::Text { text: user.to_string() }],
            }],
            system_instruction: (!system.is_empty()).then(|| GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text: system.to_string() }],
            }),
        };

        let result = self.generate(&self.text_model, &request_body).await?;
        result.text()
    }
}

#[async_trait]
impl ImageModel for GeminiClient {
    async fn render(&self, prompt: &str, reference_png: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut parts = vec![GeminiPart::Text { text: prompt.to_string() }];
        if let Some(bytes) = reference_png {
            parts.push(GeminiPart::Inline {
                inline_data: GeminiBlob {
                    mime_type: "image/png".to_string(),
                    data: BASE64.encode(bytes),
                },
            });
        }

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: None,
        };

        let result = self.generate(&self.image_model, &request_body).await?;
        result.first_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_text_joins_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "text": "Hello " }, { "text": "world" } ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().unwrap(), "Hello world");
    }

    #[test]
    fn test_gemini_inline_image_decoding() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Here is your image" },
                            { "inlineData": { "mimeType": "image/png", "data": "iVBORw==" } }
                        ]
                    }
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.first_image().unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_gemini_text_only_response_has_no_image() {
        let json = r#"{ "candidates": [ { "content": { "parts": [ { "text": "sorry" } ] } } ] }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(result.first_image().is_err());
    }

    #[test]
    fn test_inline_part_serializes_snake_case() {
        let part = GeminiPart::Inline {
            inline_data: GeminiBlob {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            },
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn test_rate_limit_is_detectable() {
        let err: anyhow::Error = RateLimited { vendor: "Gemini", body: "quota".to_string() }.into();
        assert!(is_rate_limited(&err));
        assert!(!is_rate_limited(&anyhow!("other")));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_fast() {
        let client = GeminiClient::new(&GeminiConfig::default(), reqwest::Client::new());
        let err = client.chat("", "hi").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
