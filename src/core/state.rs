use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Character {
    pub name: String,
    /// Visual description, reused verbatim in every image prompt.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub voice_style: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Chapter {
    pub title: String,
    #[serde(default)]
    pub scene_description: String,
    #[serde(default)]
    pub narrative_text: String,
    #[serde(default)]
    pub characters_present: Vec<String>,
}

/// What the outline stage produces before anything is cached.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoryOutline {
    pub title: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    OutlineComplete,
    VisualsComplete,
    AudioComplete,
    Complete,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::OutlineComplete => "outline_complete",
            StoryStatus::VisualsComplete => "visuals_complete",
            StoryStatus::AudioComplete => "audio_complete",
            StoryStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stages in the order a client must request them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Outline,
    Visuals,
    Audio,
    Transitions,
}

impl Stage {
    /// Status a story must be in before this stage may run.
    pub fn requires(&self) -> Option<StoryStatus> {
        match self {
            Stage::Outline => None,
            Stage::Visuals => Some(StoryStatus::OutlineComplete),
            Stage::Audio => Some(StoryStatus::VisualsComplete),
            Stage::Transitions => Some(StoryStatus::AudioComplete),
        }
    }

    pub fn produces(&self) -> StoryStatus {
        match self {
            Stage::Outline => StoryStatus::OutlineComplete,
            Stage::Visuals => StoryStatus::VisualsComplete,
            Stage::Audio => StoryStatus::AudioComplete,
            Stage::Transitions => StoryStatus::Complete,
        }
    }

    pub fn allows(&self, status: StoryStatus) -> bool {
        self.requires() == Some(status)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Outline => "outline",
            Stage::Visuals => "visuals",
            Stage::Audio => "audio",
            Stage::Transitions => "transitions",
        };
        f.write_str(name)
    }
}

/// A slice of the 0-100 progress scale owned by one unit of work.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressBand {
    pub start: f64,
    pub end: f64,
}

impl ProgressBand {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Progress after `done` of `total` units. An empty band jumps to its end.
    pub fn at(&self, done: usize, total: usize) -> f64 {
        if total == 0 {
            return self.end;
        }
        let fraction = (done.min(total)) as f64 / total as f64;
        self.start + fraction * (self.end - self.start)
    }
}

pub const OUTLINE_PROGRESS: f64 = 10.0;
pub const CHARACTER_BAND: ProgressBand = ProgressBand::new(20.0, 40.0);
pub const CHAPTER_BAND: ProgressBand = ProgressBand::new(40.0, 70.0);
pub const NARRATION_BAND: ProgressBand = ProgressBand::new(70.0, 90.0);
pub const TRANSITION_BAND: ProgressBand = ProgressBand::new(90.0, 100.0);
pub const COMPLETE_PROGRESS: f64 = 100.0;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub characters: Vec<Character>,
    pub chapters: Vec<Chapter>,
    pub status: StoryStatus,
    pub progress: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_images: Option<BTreeMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_images: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_audio: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro_audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_videos: Option<Vec<Option<String>>>,
}

impl Story {
    pub fn from_outline(id: String, outline: StoryOutline) -> Self {
        Self {
            id,
            title: outline.title,
            characters: outline.characters,
            chapters: outline.chapters,
            status: StoryStatus::OutlineComplete,
            progress: OUTLINE_PROGRESS,
            character_images: None,
            chapter_images: None,
            intro_audio: None,
            narration_audio: None,
            outro_audio: None,
            transition_videos: None,
        }
    }

    /// Characters named in a chapter, in the chapter's order. Names that do not
    /// match any character are skipped.
    pub fn characters_in(&self, chapter_index: usize) -> Vec<&Character> {
        let Some(chapter) = self.chapters.get(chapter_index) else {
            return Vec::new();
        };
        chapter
            .characters_present
            .iter()
            .filter_map(|name| self.characters.iter().find(|c| &c.name == name))
            .collect()
    }

    /// Names listed in chapters that match no character.
    pub fn unmatched_character_refs(&self) -> Vec<String> {
        self.chapters
            .iter()
            .flat_map(|ch| ch.characters_present.iter())
            .filter(|name| !self.characters.iter().any(|c| &c.name == *name))
            .cloned()
            .collect()
    }
}
