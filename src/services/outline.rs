use crate::core::state::{Chapter, Character, StoryOutline};
use crate::services::llm::LlmClient;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fmt::Debug;
use std::sync::Arc;

/// What to do when the LLM cannot produce a usable outline.
pub trait OutlineFallback: Send + Sync + Debug {
    fn recover(&self, prompt: &str, error: anyhow::Error) -> Result<StoryOutline>;
}

/// Surfaces the generation error unchanged.
#[derive(Debug, Default)]
pub struct NoFallback;

impl OutlineFallback for NoFallback {
    fn recover(&self, _prompt: &str, error: anyhow::Error) -> Result<StoryOutline> {
        Err(error)
    }
}

/// Picks one of the bundled demo stories by keyword.
#[derive(Debug, Default)]
pub struct DemoStoryFallback;

impl OutlineFallback for DemoStoryFallback {
    fn recover(&self, prompt: &str, error: anyhow::Error) -> Result<StoryOutline> {
        info!("Story generator unavailable ({:#}), using demo story", error);
        Ok(demo_story_for(prompt))
    }
}

pub fn demo_story_for(prompt: &str) -> StoryOutline {
    let lowered = prompt.to_lowercase();
    if lowered.contains("detective") || lowered.contains("cat") {
        detective_cat()
    } else if lowered.contains("dragon") {
        dragon_story()
    } else {
        detective_cat()
    }
}

pub struct OutlineGenerator {
    llm: Arc<dyn LlmClient>,
    fallback: Box<dyn OutlineFallback>,
}

impl OutlineGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, fallback: Box<dyn OutlineFallback>) -> Self {
        Self { llm, fallback }
    }

    pub async fn generate(&self, prompt: &str) -> Result<StoryOutline> {
        match self.request(prompt).await {
            Ok(outline) => Ok(outline),
            Err(e) => {
                warn!("Outline generation failed: {:#}", e);
                self.fallback.recover(prompt, e)
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<StoryOutline> {
        let raw = self.llm.chat("", &outline_prompt(prompt)).await?;
        let outline = parse_outline(&raw)?;
        let unmatched: Vec<&str> = outline
            .chapters
            .iter()
            .flat_map(|c| c.characters_present.iter())
            .filter(|n| !outline.characters.iter().any(|c| &c.name == *n))
            .map(String::as_str)
            .collect();
        if !unmatched.is_empty() {
            info!("Outline references unknown characters: {:?}", unmatched);
        }
        Ok(outline)
    }
}

pub fn outline_prompt(prompt: &str) -> String {
    format!(
        r#"Create a compelling 5-chapter story outline based on: "{}"

Requirements:
- Each chapter should have a clear scene description
- Include 2-3 main characters with detailed visual descriptions
- Story should have emotional highs and lows
- End with a satisfying conclusion

Format as JSON:
{{
  "title": "Story Title",
  "characters": [
    {{
      "name": "Character Name",
      "description": "Detailed visual description for consistent generation",
      "voice_style": "Brief description of speaking style"
    }}
  ],
  "chapters": [
    {{
      "title": "Chapter Title",
      "scene_description": "Detailed scene for image generation",
      "narrative_text": "Story text for this chapter",
      "characters_present": ["character names in this scene"]
    }}
  ]
}}"#,
        prompt
    )
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_outline(raw: &str) -> Result<StoryOutline> {
    let json = extract_json_object(raw).ok_or_else(|| anyhow!("No JSON object in outline response"))?;
    let outline: StoryOutline =
        serde_json::from_str(json).context(format!("Failed to parse outline JSON: {}", json))?;
    if outline.chapters.is_empty() {
        return Err(anyhow!("Outline has no chapters"));
    }
    Ok(outline)
}

fn character(name: &str, description: &str, voice_style: &str) -> Character {
    Character {
        name: name.to_string(),
        description: description.to_string(),
        voice_style: voice_style.to_string(),
    }
}

fn chapter(title: &str, scene: &str, text: &str, present: &[&str]) -> Chapter {
    Chapter {
        title: title.to_string(),
        scene_description: scene.to_string(),
        narrative_text: text.to_string(),
        characters_present: present.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn detective_cat() -> StoryOutline {
    StoryOutline {
        title: "Whiskers and the Midnight Heist".to_string(),
        characters: vec![
            character(
                "Detective Whiskers",
                "A sleek grey tabby cat with emerald eyes, a tiny tweed deerstalker hat and a brass magnifying glass on a cord",
                "Dry, measured and confident, with the occasional purr of satisfaction",
            ),
            character(
                "Mrs. Pemberton",
                "An elderly woman with silver hair in a bun, round spectacles and a lavender cardigan covered in cat hair",
                "Warm and fretful, speaks quickly when worried",
            ),
            character(
                "Shadow",
                "A lean black alley cat with a torn ear, yellow eyes and a dark scarf, moving through the night like smoke",
                "Low, sly and menacing",
            ),
        ],
        chapters: vec![
            chapter(
                "The Missing Pearls",
                "A cosy Victorian parlour at night, an open jewellery box on a lace tablecloth, moonlight through tall windows",
                "Mrs. Pemberton woke to find her grandmother's pearls gone. Only one guest had noticed the open window: Detective Whiskers, curled on the armchair, already awake.",
                &["Detective Whiskers", "Mrs. Pemberton"],
            ),
            chapter(
                "Paw Prints in the Flour",
                "A flour-dusted kitchen with copper pans, a trail of small paw prints leading to a half-open back door",
                "The trail of prints was too large for a kitten and too careful for a dog. Whiskers studied each one and followed them into the rainy garden.",
                &["Detective Whiskers"],
            ),
            chapter(
                "The Alley of Whispers",
                "A narrow cobblestone alley under gas lamps, rain puddles reflecting light, silhouettes of cats on the rooftops",
                "In the alley the street cats whispered a single name. Shadow had been seen carrying something that shone like moonlight.",
                &["Detective Whiskers", "Shadow"],
            ),
            chapter(
                "Rooftop Chase",
                "Steep slate rooftops under a full moon, chimneys and weathervanes, two cats leaping between buildings",
                "Whiskers cornered Shadow beside the clock tower. There was a chase across the slates and a leap over the gap, and the pearls slipped into a gutter.",
                &["Detective Whiskers", "Shadow"],
            ),
            chapter(
                "Home Before Dawn",
                "The Victorian parlour at sunrise, pearls back in the jewellery box, a cat asleep in a sunbeam",
                "By dawn the pearls were back on the lace and Mrs. Pemberton was pouring a saucer of cream. Whiskers accepted it with the modesty of a true professional.",
                &["Detective Whiskers", "Mrs. Pemberton"],
            ),
        ],
    }
}

pub fn dragon_story() -> StoryOutline {
    StoryOutline {
        title: "Ember Learns to Fly".to_string(),
        characters: vec![
            character(
                "Ember",
                "A young red dragon with small golden wings, big amber eyes and a stubby tail that curls when nervous",
                "Eager, young and a little breathless",
            ),
            character(
                "Grandmother Ash",
                "An old wise dragon with silver-grey scales, tattered but enormous wings and a crown of curved horns",
                "Slow, deep and kind",
            ),
            character(
                "Pip",
                "A cheerful bluebird with a white chest and a tuft of feathers on its head",
                "Quick, chirpy and encouraging",
            ),
        ],
        chapters: vec![
            chapter(
                "The Cliffside Nest",
                "A dragon nest on a misty mountain ledge at sunrise, a little red dragon peering over the edge at the valley below",
                "Every dragon in the mountains could fly except Ember. Each morning Ember watched the others glide over the valley, and each morning Ember's wings stayed folded.",
                &["Ember", "Grandmother Ash"],
            ),
            chapter(
                "A Feathered Friend",
                "A sunny meadow full of wildflowers, a small dragon and a bluebird sitting on a mossy rock",
                "Pip landed on Ember's nose and laughed. \"Flying is just falling with confidence,\" the bird chirped, and offered to teach.",
                &["Ember", "Pip"],
            ),
            chapter(
                "The First Fall",
                "A grassy hillside with a tumbling dragon mid-air, flowers scattering, the bluebird fluttering beside",
                "The first try ended in a heap of petals. So did the second. By the tenth, Ember could glide three whole wing-beats before tumbling.",
                &["Ember", "Pip"],
            ),
            chapter(
                "The Storm",
                "Dark storm clouds over the mountains, lightning, an old dragon sheltering beneath a rocky overhang",
                "When a storm trapped Grandmother Ash on the far peak, there was no time to be afraid. Ember spread both wings and jumped.",
                &["Ember", "Grandmother Ash"],
            ),
            chapter(
                "Wings Over the Valley",
                "A golden sunset sky with a small red dragon, a great grey dragon and a bluebird flying together above the valley",
                "Ember flew home with Grandmother Ash and Pip close behind. That evening the whole mountain watched the youngest dragon fly over the valley.",
                &["Ember", "Grandmother Ash", "Pip"],
            ),
        ],
    }
}
