use super::{introduction_text, select_voice, summary_text, ElevenLabsConfig, Narrator, VoiceProfile};
use crate::core::io::Storage;
use crate::core::state::{Character, Story};
use crate::services::llm::RateLimited;
use crate::utils::files::slug;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

pub const NARRATION_SETTINGS: VoiceSettings = VoiceSettings {
    stability: 0.5,
    similarity_boost: 0.8,
    style: 0.2,
    use_speaker_boost: true,
};

pub const INTRO_SETTINGS: VoiceSettings = VoiceSettings {
    stability: 0.4,
    similarity_boost: 0.8,
    style: 0.3,
    use_speaker_boost: true,
};

pub const DIALOGUE_SETTINGS: VoiceSettings = VoiceSettings {
    stability: 0.6,
    similarity_boost: 0.9,
    style: 0.4,
    use_speaker_boost: false,
};

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

pub struct ElevenLabsClient {
    config: ElevenLabsConfig,
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
}

impl ElevenLabsClient {
    pub fn new(config: &ElevenLabsConfig, client: reqwest::Client, storage: Arc<dyn Storage>) -> Self {
        Self {
            config: config.clone(),
            client,
            storage,
        }
    }

    async fn synthesize(&self, text: &str, voice_id: &str, settings: VoiceSettings) -> Result<Vec<u8>> {
        if self.config.api_key.is_empty() {
            return Err(anyhow!("ElevenLabs API key is not configured"));
        }
        let url = format!(
            "{}/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            voice_id
        );
        let body = SpeechRequest {
            text,
            model_id: &self.config.model,
            voice_settings: settings,
        };

        let resp = self
            .client
            .post(&url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("ElevenLabs request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(RateLimited { vendor: "ElevenLabs", body }.into());
        }
        if !status.is_success() {
            let err_text = resp.text().await?;
            return Err(anyhow!("ElevenLabs API error ({}): {}", status, err_text));
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Synthesises and stores one clip, logging instead of failing.
    async fn speak_to_file(
        &self,
        what: &str,
        text: &str,
        profile: VoiceProfile,
        settings: VoiceSettings,
        file_name: &str,
    ) -> Option<String> {
        let voice_id = self.config.voices.id_for(profile).to_string();
        let result = match self.synthesize(text, &voice_id, settings).await {
            Ok(audio) => self.storage.write(file_name, &audio).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(path) => {
                info!("{} saved to {}", what, path);
                Some(path)
            }
            Err(e) => {
                warn!("{} generation failed: {:#}", what, e);
                None
            }
        }
    }
}

#[async_trait]
impl Narrator for ElevenLabsClient {
    async fn generate_narration(&self, story_id: &str, text: &str, chapter_index: usize) -> Option<String> {
        self.speak_to_file(
            &format!("Narration for chapter {}", chapter_index + 1),
            text,
            VoiceProfile::Narrator,
            NARRATION_SETTINGS,
            &format!("{}_narration_{}.mp3", story_id, chapter_index + 1),
        )
        .await
    }

    async fn generate_introduction(&self, story_id: &str, title: &str) -> Option<String> {
        self.speak_to_file(
            "Introduction",
            &introduction_text(title),
            VoiceProfile::Narrator,
            INTRO_SETTINGS,
            &format!("{}_intro.mp3", story_id),
        )
        .await
    }

    async fn generate_summary(&self, story: &Story) -> Option<String> {
        self.speak_to_file(
            "Summary",
            &summary_text(story),
            VoiceProfile::Narrator,
            NARRATION_SETTINGS,
            &format!("{}_outro.mp3", story.id),
        )
        .await
    }

    async fn generate_character_dialogue(
        &self,
        story_id: &str,
        character: &Character,
        dialogue: &str,
        chapter_index: usize,
        line_number: usize,
    ) -> Option<String> {
        self.speak_to_file(
            &format!("Dialogue for {}", character.name),
            dialogue,
            select_voice(character),
            DIALOGUE_SETTINGS,
            &format!(
                "{}_dialogue_{}_{}_{}.mp3",
                story_id,
                slug(&character.name),
                chapter_index + 1,
                line_number
            ),
        )
        .await
    }
}
