use crate::core::state::{
    Stage, Story, StoryStatus, CHAPTER_BAND, CHARACTER_BAND, COMPLETE_PROGRESS, NARRATION_BAND,
    TRANSITION_BAND,
};
use crate::core::store::RecordStore;
use crate::services::fal::{ImageEnhancer, TransitionRenderer};
use crate::services::imagery::StoryIllustrator;
use crate::services::outline::OutlineGenerator;
use crate::services::tts::Narrator;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type StoryStore = dyn RecordStore<Story>;

pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Story not found")]
    StoryNotFound,
    #[error("Story or images not found")]
    ImagesNotFound,
    #[error("Character '{0}' not found in story")]
    CharacterNotFound(String),
    #[error("Cannot run {stage} while story status is {status}")]
    StageOrder { stage: Stage, status: StoryStatus },
    #[error("Story {0} already has a stage in progress")]
    StageInProgress(String),
    #[error(transparent)]
    Generation(#[from] anyhow::Error),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VisualsResult {
    pub status: StoryStatus,
    pub character_images: BTreeMap<String, Option<String>>,
    pub chapter_images: Vec<Option<String>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioResult {
    pub status: StoryStatus,
    pub intro_audio: Option<String>,
    pub narration_audio: Vec<Option<String>>,
    pub outro_audio: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TransitionsResult {
    pub status: StoryStatus,
    pub transition_videos: Vec<Option<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: StoryStatus,
    pub progress: f64,
    pub title: String,
    pub chapters_count: usize,
}

/// Runs the generation stages against the story store. Each stage works
/// through its units one at a time and writes the record back after every
/// unit, so status polls observe progress as it happens.
pub struct StoryPipeline {
    store: Arc<StoryStore>,
    outline: OutlineGenerator,
    illustrator: Arc<dyn StoryIllustrator>,
    enhancer: Arc<dyn ImageEnhancer>,
    narrator: Arc<dyn Narrator>,
    transitions: Arc<dyn TransitionRenderer>,
    transition_timeout: Duration,
    running: Mutex<HashSet<String>>,
}

/// Marks a story as busy until dropped.
struct StageClaim<'a> {
    running: &'a Mutex<HashSet<String>>,
    story_id: String,
}

impl Drop for StageClaim<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.story_id);
    }
}

impl StoryPipeline {
    pub fn new(
        store: Arc<StoryStore>,
        outline: OutlineGenerator,
        illustrator: Arc<dyn StoryIllustrator>,
        enhancer: Arc<dyn ImageEnhancer>,
        narrator: Arc<dyn Narrator>,
        transitions: Arc<dyn TransitionRenderer>,
    ) -> Self {
        Self {
            store,
            outline,
            illustrator,
            enhancer,
            narrator,
            transitions,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = timeout;
        self
    }

    pub async fn get(&self, story_id: &str) -> Result<Story, PipelineError> {
        self.store.get(story_id).await.ok_or(PipelineError::StoryNotFound)
    }

    pub async fn status(&self, story_id: &str) -> Result<StatusReport, PipelineError> {
        let story = self.get(story_id).await?;
        Ok(StatusReport {
            status: story.status,
            progress: story.progress,
            title: story.title,
            chapters_count: story.chapters.len(),
        })
    }

    async fn save(&self, story: &Story) -> Result<(), PipelineError> {
        if self.store.update(&story.id, story.clone()).await {
            Ok(())
        } else {
            Err(PipelineError::StoryNotFound)
        }
    }

    /// Takes the per-story lock that stages hold for their whole run. A second
    /// caller for the same story is refused instead of waiting.
    fn claim(&self, story_id: &str) -> Result<StageClaim<'_>, PipelineError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(story_id.to_string()) {
            warn!("Rejected stage for story {}: another stage is running", story_id);
            return Err(PipelineError::StageInProgress(story_id.to_string()));
        }
        Ok(StageClaim {
            running: &self.running,
            story_id: story_id.to_string(),
        })
    }

    fn check_stage(stage: Stage, story: &Story) -> Result<(), PipelineError> {
        if stage.allows(story.status) {
            Ok(())
        } else {
            warn!("Rejected {} for story {}: status is {}", stage, story.id, story.status);
            Err(PipelineError::StageOrder {
                stage,
                status: story.status,
            })
        }
    }

    pub async fn generate_outline(&self, prompt: &str) -> Result<Story, PipelineError> {
        info!("Generating outline for prompt: {}", prompt);
        let outline = self.outline.generate(prompt).await.map_err(|e| {
            error!("Outline generation failed: {:#}", e);
            PipelineError::Generation(e)
        })?;

        let story = self
            .store
            .create(Box::new(move |id| Story::from_outline(id, outline)))
            .await;
        for name in story.unmatched_character_refs() {
            warn!("Story {}: chapter refers to unknown character '{}'", story.id, name);
        }
        info!(
            "Story {} created: '{}' ({} characters, {} chapters)",
            story.id,
            story.title,
            story.characters.len(),
            story.chapters.len()
        );
        Ok(story)
    }

    pub async fn generate_visuals(&self, story_id: &str) -> Result<VisualsResult, PipelineError> {
        let _claim = self.claim(story_id)?;
        let mut story = self.get(story_id).await?;
        Self::check_stage(Stage::Visuals, &story)?;
        info!("Story {}: generating visuals", story.id);

        let characters = story.characters.clone();
        story.character_images = Some(BTreeMap::new());
        story.progress = CHARACTER_BAND.start;
        self.save(&story).await?;

        for (i, character) in characters.iter().enumerate() {
            let path = self
                .illustrator
                .generate_character_reference(&story.id, character)
                .await;
            if let Some(images) = story.character_images.as_mut() {
                images.insert(character.name.clone(), path);
            }
            story.progress = CHARACTER_BAND.at(i + 1, characters.len());
            self.save(&story).await?;
        }

        let total = story.chapters.len();
        let mut chapter_images: Vec<Option<String>> = Vec::with_capacity(total);
        let mut previous: Option<String> = None;
        story.chapter_images = Some(Vec::new());
        for i in 0..total {
            let generated = self
                .illustrator
                .generate_chapter_image(&story, i, previous.as_deref())
                .await;
            let slot = match generated {
                Some(path) => {
                    let description = &story.chapters[i].scene_description;
                    let enhanced = self.enhancer.enhance_image(&path, description).await;
                    previous = Some(enhanced.clone());
                    Some(enhanced)
                }
                None => None,
            };
            chapter_images.push(slot);
            story.chapter_images = Some(chapter_images.clone());
            story.progress = CHAPTER_BAND.at(i + 1, total);
            self.save(&story).await?;
        }

        story.status = Stage::Visuals.produces();
        story.progress = CHAPTER_BAND.end;
        self.save(&story).await?;
        info!(
            "Story {}: visuals complete ({}/{} chapter images)",
            story.id,
            chapter_images.iter().flatten().count(),
            total
        );

        Ok(VisualsResult {
            status: story.status,
            character_images: story.character_images.unwrap_or_default(),
            chapter_images,
        })
    }

    pub async fn generate_audio(&self, story_id: &str) -> Result<AudioResult, PipelineError> {
        let _claim = self.claim(story_id)?;
        let mut story = self.get(story_id).await?;
        Self::check_stage(Stage::Audio, &story)?;
        info!("Story {}: generating audio", story.id);

        story.intro_audio = self.narrator.generate_introduction(&story.id, &story.title).await;
        story.progress = NARRATION_BAND.start;
        self.save(&story).await?;

        let total = story.chapters.len();
        let mut narration: Vec<Option<String>> = Vec::with_capacity(total);
        for i in 0..total {
            let text = story.chapters[i].narrative_text.clone();
            narration.push(self.narrator.generate_narration(&story.id, &text, i).await);
            story.narration_audio = Some(narration.clone());
            story.progress = NARRATION_BAND.at(i + 1, total);
            self.save(&story).await?;
        }

        story.outro_audio = self.narrator.generate_summary(&story).await;
        story.status = Stage::Audio.produces();
        story.progress = NARRATION_BAND.end;
        self.save(&story).await?;
        info!("Story {}: audio complete", story.id);

        Ok(AudioResult {
            status: story.status,
            intro_audio: story.intro_audio.clone(),
            narration_audio: narration,
            outro_audio: story.outro_audio.clone(),
        })
    }

    pub async fn generate_transitions(&self, story_id: &str) -> Result<TransitionsResult, PipelineError> {
        let _claim = self.claim(story_id)?;
        let mut story = self
            .store
            .get(story_id)
            .await
            .ok_or(PipelineError::ImagesNotFound)?;
        Self::check_stage(Stage::Transitions, &story)?;
        let images = story.chapter_images.clone().ok_or(PipelineError::ImagesNotFound)?;
        info!("Story {}: generating transitions", story.id);

        let mut videos: Vec<Option<String>> = Vec::new();
        if images.iter().all(Option::is_none) {
            warn!("Story {}: no chapter images, skipping transitions", story.id);
        } else {
            story.transition_videos = Some(Vec::new());
            let total = images.len() - 1;
            for (i, pair) in images.windows(2).enumerate() {
                let slot = match (&pair[0], &pair[1]) {
                    (Some(from), Some(to)) => self.transition(&story.id, from, to, i).await,
                    _ => {
                        warn!("Story {}: transition {} skipped, missing image", story.id, i);
                        None
                    }
                };
                videos.push(slot);
                story.transition_videos = Some(videos.clone());
                story.progress = TRANSITION_BAND.at(i + 1, total);
                self.save(&story).await?;
            }
        }

        story.transition_videos = Some(videos.clone());
        story.status = Stage::Transitions.produces();
        story.progress = COMPLETE_PROGRESS;
        self.save(&story).await?;
        info!("Story {}: complete", story.id);

        Ok(TransitionsResult {
            status: story.status,
            transition_videos: videos,
        })
    }

    async fn transition(&self, story_id: &str, from: &str, to: &str, index: usize) -> Option<String> {
        let call = self.transitions.create_video_transition(story_id, from, to, index);
        match tokio::time::timeout(self.transition_timeout, call).await {
            Ok(path) => path,
            Err(_) => {
                warn!(
                    "Story {}: transition {} timed out after {:?}",
                    story_id, index, self.transition_timeout
                );
                None
            }
        }
    }

    /// Speaks one line in the voice picked for the named character.
    pub async fn speak_dialogue(
        &self,
        story_id: &str,
        character_name: &str,
        line: &str,
        chapter_index: usize,
        line_number: usize,
    ) -> Result<Option<String>, PipelineError> {
        let story = self.get(story_id).await?;
        let character = story
            .characters
            .iter()
            .find(|c| c.name == character_name)
            .ok_or_else(|| PipelineError::CharacterNotFound(character_name.to_string()))?;
        Ok(self
            .narrator
            .generate_character_dialogue(&story.id, character, line, chapter_index, line_number)
            .await)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::{Character, OUTLINE_PROGRESS};
    use crate::core::store::InMemoryStore;
    use crate::services::llm::LlmClient;
    use crate::services::outline::{DemoStoryFallback, NoFallback};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    pub(crate) struct OfflineLlm;

    #[async_trait]
    impl LlmClient for OfflineLlm {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
    }

    /// Records every progress value written to the store.
    pub(crate) struct RecordingStore {
        inner: InMemoryStore<Story>,
        pub progress: Mutex<Vec<f64>>,
    }

    impl RecordingStore {
        pub(crate) fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                progress: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordStore<Story> for RecordingStore {
        async fn create(&self, build: Box<dyn FnOnce(String) -> Story + Send>) -> Story {
            let story = self.inner.create(build).await;
            self.progress.lock().unwrap().push(story.progress);
            story
        }
        async fn get(&self, id: &str) -> Option<Story> {
            self.inner.get(id).await
        }
        async fn update(&self, id: &str, record: Story) -> bool {
            self.progress.lock().unwrap().push(record.progress);
            self.inner.update(id, record).await
        }
        async fn remove(&self, id: &str) -> bool {
            self.inner.remove(id).await
        }
        async fn list(&self) -> Vec<Story> {
            self.inner.list().await
        }
    }

    #[derive(Default)]
    pub(crate) struct MockIllustrator {
        pub fail_all: bool,
        pub fail_chapters: Vec<usize>,
        pub delay: Option<Duration>,
        pub previous_seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl StoryIllustrator for MockIllustrator {
        async fn generate_character_reference(&self, story_id: &str, character: &Character) -> Option<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (!self.fail_all).then(|| format!("{}_character_{}.png", story_id, character.name))
        }

        async fn generate_chapter_image(
            &self,
            story: &Story,
            chapter_index: usize,
            previous_image: Option<&str>,
        ) -> Option<String> {
            self.previous_seen
                .lock()
                .unwrap()
                .push(previous_image.map(str::to_string));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_all || self.fail_chapters.contains(&chapter_index) {
                return None;
            }
            Some(format!("{}_chapter_{}.png", story.id, chapter_index + 1))
        }
    }

    pub(crate) struct SuffixEnhancer;

    #[async_trait]
    impl ImageEnhancer for SuffixEnhancer {
        async fn enhance_image(&self, image_path: &str, _description: &str) -> String {
            image_path.replace(".png", "_enhanced.png")
        }
    }

    pub(crate) struct MockNarrator;

    #[async_trait]
    impl Narrator for MockNarrator {
        async fn generate_narration(&self, story_id: &str, _text: &str, chapter_index: usize) -> Option<String> {
            // Every third chapter fails.
            (chapter_index % 3 != 2).then(|| format!("{}_narration_{}.mp3", story_id, chapter_index + 1))
        }
        async fn generate_introduction(&self, story_id: &str, _title: &str) -> Option<String> {
            Some(format!("{}_intro.mp3", story_id))
        }
        async fn generate_summary(&self, _story: &Story) -> Option<String> {
            None
        }
        async fn generate_character_dialogue(
            &self,
            story_id: &str,
            character: &Character,
            _dialogue: &str,
            chapter_index: usize,
            line_number: usize,
        ) -> Option<String> {
            Some(format!(
                "{}_dialogue_{}_{}_{}.mp3",
                story_id, character.name, chapter_index + 1, line_number
            ))
        }
    }

    #[derive(Default)]
    pub(crate) struct MockRenderer {
        pub calls: AtomicUsize,
        pub delay: Option<Duration>,
    }

    #[async_trait]
    impl TransitionRenderer for MockRenderer {
        async fn create_video_transition(
            &self,
            story_id: &str,
            _from_image: &str,
            _to_image: &str,
            index: usize,
        ) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Some(format!("{}_transition_{}.mp4", story_id, index))
        }
    }

    pub(crate) fn demo_pipeline(
        store: Arc<StoryStore>,
        illustrator: Arc<MockIllustrator>,
        renderer: Arc<MockRenderer>,
    ) -> StoryPipeline {
        StoryPipeline::new(
            store,
            OutlineGenerator::new(Arc::new(OfflineLlm), Box::new(DemoStoryFallback)),
            illustrator,
            Arc::new(SuffixEnhancer),
            Arc::new(MockNarrator),
            renderer,
        )
    }

    #[tokio::test]
    async fn test_full_run_with_dragon_fallback() -> Result<()> {
        let store = Arc::new(RecordingStore::new());
        let illustrator = Arc::new(MockIllustrator::default());
        let renderer = Arc::new(MockRenderer::default());
        let pipeline = demo_pipeline(store.clone(), illustrator.clone(), renderer.clone());

        let story = pipeline.generate_outline("A brave dragon learning to fly").await?;
        assert_eq!(story.title, "Ember Learns to Fly");
        assert_eq!(story.characters.len(), 3);
        assert_eq!(story.chapters.len(), 5);
        assert_eq!(story.status, StoryStatus::OutlineComplete);
        assert_eq!(story.progress, OUTLINE_PROGRESS);

        let visuals = pipeline.generate_visuals(&story.id).await?;
        assert_eq!(visuals.status, StoryStatus::VisualsComplete);
        assert_eq!(visuals.character_images.len(), 3);
        assert_eq!(visuals.chapter_images.len(), 5);
        assert_eq!(
            visuals.chapter_images[0].as_deref(),
            Some(format!("{}_chapter_1_enhanced.png", story.id).as_str())
        );

        // Each chapter after the first is conditioned on the previous enhanced image.
        let previous = illustrator.previous_seen.lock().unwrap().clone();
        assert_eq!(previous[0], None);
        assert_eq!(previous[1], visuals.chapter_images[0]);

        let audio = pipeline.generate_audio(&story.id).await?;
        assert_eq!(audio.status, StoryStatus::AudioComplete);
        assert_eq!(audio.narration_audio.len(), 5);
        assert!(audio.narration_audio[2].is_none());
        assert!(audio.intro_audio.is_some());
        assert!(audio.outro_audio.is_none());

        let transitions = pipeline.generate_transitions(&story.id).await?;
        assert_eq!(transitions.status, StoryStatus::Complete);
        assert_eq!(transitions.transition_videos.len(), 4);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 4);

        let status = pipeline.status(&story.id).await?;
        assert_eq!(status.progress, COMPLETE_PROGRESS);
        assert_eq!(status.chapters_count, 5);

        let progress = store.progress.lock().unwrap().clone();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);
        assert_eq!(progress.last(), Some(&COMPLETE_PROGRESS));
        // Four transitions step through 90..100 before the final write.
        assert!(progress.contains(&92.5));
        assert!(progress.contains(&97.5));
        Ok(())
    }

    #[tokio::test]
    async fn test_overlapping_stage_calls_are_refused() -> Result<()> {
        let store = Arc::new(RecordingStore::new());
        let illustrator = Arc::new(MockIllustrator {
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let pipeline = demo_pipeline(store.clone(), illustrator.clone(), Arc::new(MockRenderer::default()));
        let story = pipeline.generate_outline("dragon").await?;

        let (first, second) = tokio::join!(pipeline.generate_visuals(&story.id), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pipeline.generate_visuals(&story.id).await
        });
        assert!(first.is_ok());
        assert!(matches!(second, Err(PipelineError::StageInProgress(_))));
        assert_eq!(illustrator.previous_seen.lock().unwrap().len(), 5);

        let progress = store.progress.lock().unwrap().clone();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);

        // The claim is released once the stage finishes.
        pipeline.generate_audio(&story.id).await?;
        assert!(matches!(
            pipeline.generate_visuals(&story.id).await,
            Err(PipelineError::StageOrder { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_all_images_missing_skips_video_adapter() -> Result<()> {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let illustrator = Arc::new(MockIllustrator {
            fail_all: true,
            ..Default::default()
        });
        let renderer = Arc::new(MockRenderer::default());
        let pipeline = demo_pipeline(store, illustrator, renderer.clone());

        let story = pipeline.generate_outline("a detective cat").await?;
        let visuals = pipeline.generate_visuals(&story.id).await?;
        assert!(visuals.chapter_images.iter().all(Option::is_none));
        assert!(visuals.character_images.values().all(Option::is_none));
        pipeline.generate_audio(&story.id).await?;

        let transitions = pipeline.generate_transitions(&story.id).await?;
        assert_eq!(transitions.status, StoryStatus::Complete);
        assert!(transitions.transition_videos.is_empty());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.get(&story.id).await?.progress, COMPLETE_PROGRESS);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_neighbour_yields_null_slot() -> Result<()> {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let illustrator = Arc::new(MockIllustrator {
            fail_chapters: vec![1],
            ..Default::default()
        });
        let renderer = Arc::new(MockRenderer::default());
        let pipeline = demo_pipeline(store, illustrator.clone(), renderer.clone());

        let story = pipeline.generate_outline("dragon").await?;
        let visuals = pipeline.generate_visuals(&story.id).await?;
        // Chapter 3 is conditioned on chapter 1, the last image that succeeded.
        let previous = illustrator.previous_seen.lock().unwrap().clone();
        assert_eq!(previous[2], visuals.chapter_images[0]);

        pipeline.generate_audio(&story.id).await?;
        let transitions = pipeline.generate_transitions(&story.id).await?;
        assert_eq!(transitions.transition_videos.len(), 4);
        assert!(transitions.transition_videos[0].is_none());
        assert!(transitions.transition_videos[1].is_none());
        assert!(transitions.transition_videos[2].is_some());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_transition_times_out() -> Result<()> {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let renderer = Arc::new(MockRenderer {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let pipeline = demo_pipeline(store, Arc::new(MockIllustrator::default()), renderer)
            .with_transition_timeout(Duration::from_millis(10));

        let story = pipeline.generate_outline("dragon").await?;
        pipeline.generate_visuals(&story.id).await?;
        pipeline.generate_audio(&story.id).await?;
        let transitions = pipeline.generate_transitions(&story.id).await?;
        assert_eq!(transitions.transition_videos, vec![None; 4]);
        assert_eq!(transitions.status, StoryStatus::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_order_is_enforced() -> Result<()> {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let renderer = Arc::new(MockRenderer::default());
        let pipeline = demo_pipeline(store, Arc::new(MockIllustrator::default()), renderer);

        let story = pipeline.generate_outline("cat").await?;
        assert!(matches!(
            pipeline.generate_audio(&story.id).await,
            Err(PipelineError::StageOrder {
                stage: Stage::Audio,
                status: StoryStatus::OutlineComplete
            })
        ));
        assert!(matches!(
            pipeline.generate_transitions(&story.id).await,
            Err(PipelineError::StageOrder { .. })
        ));

        pipeline.generate_visuals(&story.id).await?;
        assert!(matches!(
            pipeline.generate_visuals(&story.id).await,
            Err(PipelineError::StageOrder { .. })
        ));

        pipeline.generate_audio(&story.id).await?;
        pipeline.generate_transitions(&story.id).await?;
        assert!(matches!(
            pipeline.generate_transitions(&story.id).await,
            Err(PipelineError::StageOrder {
                status: StoryStatus::Complete,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let renderer = Arc::new(MockRenderer::default());
        let pipeline = demo_pipeline(store, Arc::new(MockIllustrator::default()), renderer);

        assert!(matches!(pipeline.status("42").await, Err(PipelineError::StoryNotFound)));
        assert!(matches!(pipeline.generate_visuals("42").await, Err(PipelineError::StoryNotFound)));
        assert!(matches!(pipeline.generate_audio("42").await, Err(PipelineError::StoryNotFound)));
        assert!(matches!(
            pipeline.generate_transitions("42").await,
            Err(PipelineError::ImagesNotFound)
        ));
    }

    #[tokio::test]
    async fn test_outline_failure_without_fallback() {
        let pipeline = StoryPipeline::new(
            Arc::new(InMemoryStore::<Story>::new()),
            OutlineGenerator::new(Arc::new(OfflineLlm), Box::new(NoFallback)),
            Arc::new(MockIllustrator::default()),
            Arc::new(SuffixEnhancer),
            Arc::new(MockNarrator),
            Arc::new(MockRenderer::default()),
        );
        assert!(matches!(
            pipeline.generate_outline("dragon").await,
            Err(PipelineError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn test_speak_dialogue() -> Result<()> {
        let store = Arc::new(InMemoryStore::<Story>::new());
        let pipeline = demo_pipeline(store, Arc::new(MockIllustrator::default()), Arc::new(MockRenderer::default()));
        let story = pipeline.generate_outline("dragon").await?;

        let path = pipeline.speak_dialogue(&story.id, "Pip", "Look up!", 1, 2).await?;
        assert_eq!(path, Some(format!("{}_dialogue_Pip_2_2.mp3", story.id)));
        assert!(matches!(
            pipeline.speak_dialogue(&story.id, "Nobody", "Hi", 0, 0).await,
            Err(PipelineError::CharacterNotFound(_))
        ));
        Ok(())
    }
}
