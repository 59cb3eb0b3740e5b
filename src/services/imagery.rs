use crate::core::io::Storage;
use crate::core::state::{Character, Story};
use crate::services::llm::{is_rate_limited, ImageModel};
use crate::utils::files::slug;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// Produces story artwork. Failures come back as `None` so a stage can carry on.
#[async_trait]
pub trait StoryIllustrator: Send + Sync {
    async fn generate_character_reference(&self, story_id: &str, character: &Character) -> Option<String>;
    async fn generate_chapter_image(
        &self,
        story: &Story,
        chapter_index: usize,
        previous_image: Option<&str>,
    ) -> Option<String>;
}

pub struct Illustrator {
    model: Arc<dyn ImageModel>,
    storage: Arc<dyn Storage>,
}

impl Illustrator {
    pub fn new(model: Arc<dyn ImageModel>, storage: Arc<dyn Storage>) -> Self {
        Self { model, storage }
    }

    async fn try_character(&self, story_id: &str, character: &Character) -> Result<String> {
        let bytes = self.model.render(&character_prompt(character), None).await?;
        let file_name = format!("{}_character_{}.png", story_id, slug(&character.name));
        self.storage.write(&file_name, &bytes).await
    }

    async fn try_chapter(&self, story: &Story, chapter_index: usize, previous: Option<&str>) -> Result<String> {
        let reference = match previous {
            Some(path) if self.storage.exists(path).await? => Some(self.storage.read(path).await?),
            _ => None,
        };
        let prompt = chapter_prompt(story, chapter_index, reference.is_some());
        let bytes = self.model.render(&prompt, reference.as_deref()).await?;
        let file_name = format!("{}_chapter_{}.png", story.id, chapter_index + 1);
        self.storage.write(&file_name, &bytes).await
    }
}

pub fn character_prompt(character: &Character) -> String {
    format!(
        "Create a character reference sheet showing {}: {}\n\n\
         Style: Clean character design, multiple angles (front, side, back), consistent appearance, high detail\n\
         Background: Simple white background\n\
         Layout: Character study/reference sheet format",
        character.name, character.description
    )
}

pub fn chapter_prompt(story: &Story, chapter_index: usize, with_reference: bool) -> String {
    let scene = story
        .chapters
        .get(chapter_index)
        .map(|c| c.scene_description.as_str())
        .unwrap_or_default();
    let cast = story
        .characters_in(chapter_index)
        .iter()
        .map(|c| format!("{}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join(". ");
    let continuity = if with_reference {
        "\nMaintain character consistency with the previous image."
    } else {
        ""
    };
    format!(
        "Create a photorealistic image for this story chapter:\n\n\
         Scene: {}\n\
         Characters in scene: {}\n\n\
         Style: Cinematic, highly detailed, consistent character appearance{}",
        scene, cast, continuity
    )
}

fn log_failure(what: &str, err: &anyhow::Error) {
    if is_rate_limited(err) {
        warn!("{} skipped: rate limit hit, consider waiting or upgrading the quota", what);
    } else {
        warn!("{} generation failed: {:#}", what, err);
    }
}

#[async_trait]
impl StoryIllustrator for Illustrator {
    async fn generate_character_reference(&self, story_id: &str, character: &Character) -> Option<String> {
        match self.try_character(story_id, character).await {
            Ok(path) => {
                info!("Character reference for {} saved to {}", character.name, path);
                Some(path)
            }
            Err(e) => {
                log_failure(&format!("Character reference for {}", character.name), &e);
                None
            }
        }
    }

    async fn generate_chapter_image(
        &self,
        story: &Story,
        chapter_index: usize,
        previous_image: Option<&str>,
    ) -> Option<String> {
        match self.try_chapter(story, chapter_index, previous_image).await {
            Ok(path) => Some(path),
            Err(e) => {
                log_failure(&format!("Chapter {} image", chapter_index + 1), &e);
                None
            }
        }
    }
}
