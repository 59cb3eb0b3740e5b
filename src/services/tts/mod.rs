use crate::core::state::{Character, Story};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsClient;

/// Speech synthesis for a story. Every method yields the written file path,
/// or `None` when synthesis failed.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn generate_narration(&self, story_id: &str, text: &str, chapter_index: usize) -> Option<String>;
    async fn generate_introduction(&self, story_id: &str, title: &str) -> Option<String>;
    async fn generate_summary(&self, story: &Story) -> Option<String>;
    async fn generate_character_dialogue(
        &self,
        story_id: &str,
        character: &Character,
        dialogue: &str,
        chapter_index: usize,
        line_number: usize,
    ) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceProfile {
    Narrator,
    HeroMale,
    HeroFemale,
    Wise,
    Villain,
    Child,
    Mystical,
}

/// Voice ids per profile. Defaults are the stock ElevenLabs voices.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceIds {
    #[serde(default = "default_narrator")]
    pub narrator: String,
    #[serde(default = "default_hero_male")]
    pub hero_male: String,
    #[serde(default = "default_hero_female")]
    pub hero_female: String,
    #[serde(default = "default_wise")]
    pub wise: String,
    #[serde(default = "default_villain")]
    pub villain: String,
    #[serde(default = "default_child")]
    pub child: String,
    #[serde(default = "default_mystical")]
    pub mystical: String,
}

fn default_narrator() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string() // Rachel
}
fn default_hero_male() -> String {
    "ErXwobaYiN019PkySvjV".to_string() // Antoni
}
fn default_hero_female() -> String {
    "EXAVITQu4vr4xnSDxMaL".to_string() // Bella
}
fn default_wise() -> String {
    "VR6AewLTigWG4xSOukaG".to_string() // Arnold
}
fn default_villain() -> String {
    "pNInz6obpgDQGcFmaJgB".to_string() // Adam
}
fn default_child() -> String {
    "XB0fDUnXU5powFXDhCwa".to_string() // Charlotte
}
fn default_mystical() -> String {
    "oWAxZDx7w5VEj9dCyTzz".to_string() // Grace
}

impl Default for VoiceIds {
    fn default() -> Self {
        Self {
            narrator: default_narrator(),
            hero_male: default_hero_male(),
            hero_female: default_hero_female(),
            wise: default_wise(),
            villain: default_villain(),
            child: default_child(),
            mystical: default_mystical(),
        }
    }
}

impl VoiceIds {
    pub fn id_for(&self, profile: VoiceProfile) -> &str {
        match profile {
            VoiceProfile::Narrator => &self.narrator,
            VoiceProfile::HeroMale => &self.hero_male,
            VoiceProfile::HeroFemale => &self.hero_female,
            VoiceProfile::Wise => &self.wise,
            VoiceProfile::Villain => &self.villain,
            VoiceProfile::Child => &self.child,
            VoiceProfile::Mystical => &self.mystical,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_elevenlabs_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub voices: VoiceIds,
}

fn default_elevenlabs_base_url() -> String {
    "https://api.elevenlabs.io/v1".to_string()
}
fn default_model() -> String {
    "eleven_multilingual_v2".to_string()
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_elevenlabs_base_url(),
            model: default_model(),
            voices: VoiceIds::default(),
        }
    }
}

/// Keyword match over the character's description and voice style.
/// First hit wins: child, villain, mystical, wise, female, then male.
pub fn select_voice(character: &Character) -> VoiceProfile {
    let text = format!("{} {}", character.description, character.voice_style).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["child", "young"]) {
        VoiceProfile::Child
    } else if has(&["villain", "dark", "evil", "menacing"]) {
        VoiceProfile::Villain
    } else if has(&["mystical", "magical"]) {
        VoiceProfile::Mystical
    } else if has(&["wise", "old"]) {
        VoiceProfile::Wise
    } else if has(&["female", "woman", "girl"]) {
        VoiceProfile::HeroFemale
    } else {
        VoiceProfile::HeroMale
    }
}

pub fn introduction_text(title: &str) -> String {
    format!(
        "Welcome to {}. Let me tell you an incredible story that will take you on an unforgettable journey.",
        title
    )
}

pub fn summary_text(story: &Story) -> String {
    let names = story
        .characters
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "And so ends our tale of {}. Thank you for joining us on this incredible journey through the world of {}.",
        story.title, names
    )
}
