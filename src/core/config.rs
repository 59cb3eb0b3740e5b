use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::fal::FalConfig;
use crate::services::llm::GeminiConfig;
use crate::services::tts::ElevenLabsConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_public")]
    pub public_folder: String,

    /// Seconds before a cached story expires. Unset keeps stories for the process lifetime.
    #[serde(default)]
    pub store_ttl_seconds: Option<u64>,

    #[serde(default)]
    pub fallback: FallbackMode,

    /// Seconds allowed per video transition before it is abandoned.
    #[serde(default = "default_transition_timeout")]
    pub transition_timeout_seconds: u64,

    /// Overall timeout for vendor HTTP calls. Unset means no timeout.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub fal: FalConfig,

    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Serve a bundled demo story when the outline cannot be generated.
    #[default]
    Demo,
    /// Surface outline failures to the caller.
    None,
}

fn default_port() -> u16 {
    3000
}
fn default_output() -> String {
    "generated".to_string()
}
fn default_public() -> String {
    "public".to_string()
}
fn default_transition_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            output_folder: default_output(),
            public_folder: default_public(),
            store_ttl_seconds: None,
            fallback: FallbackMode::default(),
            transition_timeout_seconds: default_transition_timeout(),
            request_timeout_seconds: None,
            gemini: GeminiConfig::default(),
            fal: FalConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
        }
    }
}

impl Config {
    /// Reads `config.yml` when present, then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(Path::new("config.yml"))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Vendor keys and the listening port are taken from the environment when set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOOGLE_API_KEY") {
            self.gemini.api_key = key;
        }
        if let Some(key) = lookup("FAL_KEY") {
            self.fal.api_key = key;
        }
        if let Some(key) = lookup("ELEVENLABS_API_KEY") {
            self.elevenlabs.api_key = key;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(dir) = lookup("STORYFORGE_OUTPUT_DIR") {
            self.output_folder = dir;
        }
        if let Some(dir) = lookup("STORYFORGE_PUBLIC_DIR") {
            self.public_folder = dir;
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)
            .with_context(|| format!("Failed to create {}", self.output_folder))?;
        Ok(())
    }
}
