//! StoryVerse writing guidance: prompt builders for each wizard step and the
//! markdown-to-HTML pass applied to the LLM's answer.

use crate::services::llm::LlmClient;
use anyhow::{anyhow, Result};
use log::error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

const NOT_SPECIFIED: &str = "Not specified";

const GUIDANCE_SYSTEM: &str = "You are an experienced story development coach. \
    Give concrete, encouraging, well-structured guidance.";

/// Free-form answers from one wizard step, keyed by form field id.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(transparent)]
pub struct StepData(pub Map<String, Value>);

impl StepData {
    pub fn field(&self, key: &str) -> String {
        self.get(key).unwrap_or_else(|| NOT_SPECIFIED.to_string())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let text = match self.0.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct AllStepData {
    #[serde(default)]
    pub step1: StepData,
    #[serde(default)]
    pub step2: StepData,
    #[serde(default)]
    pub step3: StepData,
    #[serde(default)]
    pub step4: StepData,
    #[serde(default)]
    pub step5: StepData,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct SupportingCharacter {
    /// Frontend element id, kept so a reloaded snapshot can still address the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub traits: Option<String>,
}

fn or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(fallback)
}

fn supporting_cast(cast: &[SupportingCharacter], empty: &str) -> String {
    if cast.is_empty() {
        return empty.to_string();
    }
    cast.iter()
        .map(|c| {
            format!(
                "- {}: Relationship: {} | Role: {} | Traits: {}",
                or(&c.name, "Unnamed"),
                or(&c.relationship, "Unknown"),
                or(&c.role, "Unknown"),
                or(&c.traits, "Not defined")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn ideas_prompt(foundation: &StepData, discovery: &StepData) -> String {
    format!(
        "Based on this story foundation and brainstorming, help expand and refine the ideas:

FOUNDATION:
- Reader feeling desired: {}
- Conversation to spark: {}
- Personal connection: {}
- Genre: {}
- Genre promise: {}
- Theme: {}
- Vision/Mood: {}

BRAINSTORMING:
- Brain dump: {}
- What if question: {}
- What if outcomes: {}
- Premise: {}

Please provide:
1. **Refined Premise**: A polished 1-2 sentence premise that captures the essence
2. **Story Hooks**: 3-4 compelling opening scenarios that could grab readers immediately
3. **Conflict Escalation**: How the central conflict could build throughout the story
4. **Unique Angles**: What makes this story different from others in the genre
5. **Theme Integration**: How the theme can be woven naturally into the plot

Format with clear headings and bullet points for easy reading.",
        foundation.field("reader-feeling"),
        foundation.field("book-conversation"),
        foundation.field("personal-connection"),
        foundation.field("genre"),
        foundation.field("genre-promise"),
        foundation.field("theme"),
        foundation.field("vision-board"),
        discovery.field("brain-dump"),
        discovery.field("what-if"),
        discovery.field("what-if-outcomes"),
        discovery.field("premise"),
    )
}

pub fn characters_prompt(
    foundation: &StepData,
    discovery: &StepData,
    character: &StepData,
    supporting: &[SupportingCharacter],
) -> String {
    format!(
        "Help develop rich, compelling characters based on this information:

STORY CONTEXT:
- Theme: {}
- Genre: {}
- Premise: {}

MAIN CHARACTER:
- Name: {}
- Goal: {}
- Obstacle: {}
- Flaw: {}
- Backstory: {}
- Vulnerability: {}

SUPPORTING CHARACTERS:
{}

Please provide:
1. **Main Character Enhancement**: Deeper personality traits, quirks, speech patterns, and how they'll change
2. **Character Voice**: How they speak, think, and express themselves uniquely
3. **Relationship Dynamics**: How characters interact and create tension/chemistry
4. **Character Arcs**: How each character grows or changes throughout the story
5. **Conflict Sources**: Internal and external conflicts that drive character development
6. **Dialogue Samples**: Example conversations that show their distinct voices

Format with clear headings and engaging descriptions.",
        foundation.field("theme"),
        foundation.field("genre"),
        discovery.field("premise"),
        character.field("main-character-name"),
        character.field("character-goal"),
        character.field("character-obstacle"),
        character.field("character-flaw"),
        character.field("character-backstory"),
        character.field("character-vulnerability"),
        supporting_cast(supporting, "None specified"),
    )
}

pub fn world_prompt(foundation: &StepData, discovery: &StepData, world: &StepData) -> String {
    format!(
        "Help enhance the world-building for this story:

STORY CONTEXT:
- Genre: {}
- Theme: {}
- Premise: {}

WORLD ELEMENTS:
- Rules of reality: {}
- Smells: {}
- Sounds: {}
- Textures: {}
- Visual details: {}
- Symbolic setting: {}

Please provide:
1. **Atmospheric Details**: Rich sensory descriptions that immerse readers
2. **Setting as Character**: How the environment influences and reflects the story
3. **Cultural Elements**: Social norms, customs, or systems that affect characters
4. **Hidden Details**: Small world-building elements that add authenticity
5. **Symbolic Layers**: How settings reinforce themes and character arcs
6. **Conflict Sources**: Environmental or societal tensions that drive plot

Make the world feel lived-in and authentic to the genre and theme.",
        foundation.field("genre"),
        foundation.field("theme"),
        discovery.field("premise"),
        world.field("world-rules"),
        world.field("world-smell"),
        world.field("world-sounds"),
        world.field("world-textures"),
        world.field("world-visuals"),
        world.field("symbolic-setting"),
    )
}

pub fn plot_prompt(all: &AllStepData) -> String {
    format!(
        "Create a detailed plot structure based on all this story development:

FOUNDATION:
- Theme: {}
- Genre: {}
- Reader feeling: {}

DISCOVERY:
- Premise: {}
- What if: {}

CHARACTER:
- Main character: {}
- Goal: {}
- Obstacle: {}
- Flaw: {}

WORLD:
- Setting rules: {}
- Symbolic elements: {}

PLOT POINTS:
- Hook: {}
- Turning Point 1: {}
- Turning Point 2: {}
- Turning Point 3: {}
- Climax: {}
- Resolution: {}

Please provide:
1. **Detailed Outline**: Chapter-by-chapter breakdown with key events
2. **Pacing Guide**: How to balance action, character development, and world-building
3. **Tension Arc**: How conflict builds and releases throughout the story
4. **Character Integration**: How plot serves character arcs and vice versa
5. **Theme Weaving**: How plot events reinforce the central theme
6. **Subplot Suggestions**: Secondary storylines that enrich the main plot

Create a roadmap that turns the concept into a compelling narrative journey.",
        all.step1.field("theme"),
        all.step1.field("genre"),
        all.step1.field("reader-feeling"),
        all.step2.field("premise"),
        all.step2.field("what-if"),
        all.step3.field("main-character-name"),
        all.step3.field("character-goal"),
        all.step3.field("character-obstacle"),
        all.step3.field("character-flaw"),
        all.step4.field("world-rules"),
        all.step4.field("symbolic-setting"),
        all.step5.field("hook"),
        all.step5.field("turning-point-1"),
        all.step5.field("turning-point-2"),
        all.step5.field("turning-point-3"),
        all.step5.field("climax"),
        all.step5.field("resolution"),
    )
}

/// Act boundaries for an `chapters`-chapter book, as inclusive end chapters.
fn act_breaks(chapters: usize) -> [usize; 3] {
    let at = |fraction: f64| (chapters as f64 * fraction).ceil() as usize;
    [at(0.25), at(0.5), at(0.75)]
}

pub fn overview_prompt(all: &AllStepData, supporting: &[SupportingCharacter]) -> String {
    let chapters = 8;
    let [act1, act2a, act2b] = act_breaks(chapters);
    let genre = all.step1.get("genre").unwrap_or_else(|| "your chosen genre".to_string());
    format!(
        "You are creating the ultimate story development bible: a comprehensive guide that turns scattered ideas into a cohesive, publishable story.

FOUNDATION & VISION:
- Core Theme: {}
- Genre: {}
- Reader Emotional Journey: {}
- Cultural Conversation: {}
- Author's Personal Connection: {}
- Genre Promise: {}
- Story Atmosphere/Vision: {}

DISCOVERY & BRAINSTORMING:
- Core Premise: {}
- Central \"What If\": {}
- Story Possibilities: {}
- Creative Brain Dump: {}

CHARACTERS:
Main Character:
- Name: {}
- External Goal: {}
- Primary Obstacle: {}
- Character Flaw/Weakness: {}
- Formative Backstory: {}
- Relatable Vulnerability: {}

Supporting Cast:
{}

WORLD-BUILDING:
- Reality Framework: {}
- Scents: {}
- Sounds: {}
- Textures: {}
- Visual Elements: {}
- Symbolic Environment: {}

PLOT STRUCTURE:
- Opening Hook: {}
- Turning Point 1: {}
- Turning Point 2: {}
- Turning Point 3: {}
- Story Climax: {}
- Resolution: {}
- Structure Framework: {}

Create a story development guide with these sections:

## STORY DNA
**ONE-SENTENCE HOOK**, **ELEVATOR PITCH**, **THEMATIC STATEMENT**, **GENRE PROMISE & TWIST**, **TARGET READER PROFILE**

## STORY BIBLE
**PREMISE EXPANSION**, **STAKES CASCADE** (personal, professional, universal), **TONE & VOICE GUIDE**, **THEME INTEGRATION MAP**

## CHARACTER CONSTELLATION
**PROTAGONIST DEEP DIVE**, **SUPPORTING CHARACTER DYNAMICS**, **CHARACTER INTERACTION MATRIX**

## WORLD AS CHARACTER
**SETTING THAT BREATHES**, **CULTURAL DEPTH**, **SENSORY IMMERSION GUIDE**, **SYMBOLIC ARCHITECTURE**, **SETTING-DRIVEN CONFLICTS**

## STORY ARCHITECTURE
- Act I: Setup and inciting incident (approx. chapters 1-{})
- Act II-A: Rising action and obstacles (chapters {}-{})
- Act II-B: Deepening conflict and stakes (chapters {}-{})
- Act III: Climax and resolution (chapters {}-{}+)
For each major turning point give the scene purpose, emotional temperature, key moments and how it sets up the next scene.

## WRITING EXECUTION STRATEGY
Daily approach, chapter length, revision checkpoints, pacing pitfalls typical in {}, and theme-weaving techniques.

## READER EXPERIENCE DESIGN
**EMOTIONAL ROLLER COASTER**, **PAGE-TURNER MECHANICS**, **PAYOFF PROMISES**, **SATISFYING CONCLUSION CHECKLIST**

## REVISION ROADMAP
**FIRST DRAFT PRIORITIES**, **SECOND DRAFT FOCUS**, **THIRD DRAFT POLISH**, **BETA READER QUESTIONS**

Make every section immediately useful for writing the actual book. Use headings, bullet points and specific examples.",
        all.step1.field("theme"),
        all.step1.field("genre"),
        all.step1.field("reader-feeling"),
        all.step1.field("book-conversation"),
        all.step1.field("personal-connection"),
        all.step1.field("genre-promise"),
        all.step1.field("vision-board"),
        all.step2.field("premise"),
        all.step2.field("what-if"),
        all.step2.field("what-if-outcomes"),
        all.step2.field("brain-dump"),
        all.step3.field("main-character-name"),
        all.step3.field("character-goal"),
        all.step3.field("character-obstacle"),
        all.step3.field("character-flaw"),
        all.step3.field("character-backstory"),
        all.step3.field("character-vulnerability"),
        supporting_cast(supporting, "No supporting characters defined yet"),
        all.step4.field("world-rules"),
        all.step4.field("world-smell"),
        all.step4.field("world-sounds"),
        all.step4.field("world-textures"),
        all.step4.field("world-visuals"),
        all.step4.field("symbolic-setting"),
        all.step5.field("hook"),
        all.step5.field("turning-point-1"),
        all.step5.field("turning-point-2"),
        all.step5.field("turning-point-3"),
        all.step5.field("climax"),
        all.step5.field("resolution"),
        all.step5.field("framework"),
        act1,
        act1 + 1,
        act2a,
        act2a + 1,
        act2b,
        act2b + 1,
        chapters,
        genre,
    )
}

#[derive(Debug, thiserror::Error)]
#[error("Writing guidance service unavailable")]
pub struct GuidanceUnavailable;

pub struct GuidanceWriter {
    llm: Arc<dyn LlmClient>,
}

impl GuidanceWriter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate_writing_guidance(&self, prompt: &str) -> Result<String> {
        match self.llm.chat(GUIDANCE_SYSTEM, prompt).await {
            Ok(text) => Ok(markdown_to_html(&text)),
            Err(e) => {
                error!("Writing guidance request failed: {:#}", e);
                Err(anyhow!(GuidanceUnavailable))
            }
        }
    }
}

struct Patterns {
    fence: Regex,
    html_block: Regex,
    heading: Regex,
    bullet: Regex,
    numbered: Regex,
    bold: Regex,
    italic: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        fence: Regex::new(r"(?m)^\s*```[a-zA-Z]*\s*$").expect("valid regex"),
        html_block: Regex::new(r"(?i)<(h[1-6]|p|ul|ol|div|section)[\s>]").expect("valid regex"),
        heading: Regex::new(r"^(#{1,6})\s+(.*)$").expect("valid regex"),
        bullet: Regex::new(r"^\s*[-*•]\s+(.*)$").expect("valid regex"),
        numbered: Regex::new(r"^\s*\d+[.)]\s+(.*)$").expect("valid regex"),
        bold: Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"),
        italic: Regex::new(r"\*([^*\s][^*]*?)\*").expect("valid regex"),
    })
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn inline(text: &str) -> String {
    let p = patterns();
    let escaped = escape_html(text.trim());
    let bolded = p.bold.replace_all(&escaped, "<strong>$1</strong>");
    p.italic.replace_all(&bolded, "<em>$1</em>").to_string()
}

#[derive(PartialEq)]
enum Block {
    None,
    Paragraph,
    Bullets,
    Numbers,
}

/// Converts the markdown-ish text LLMs return into HTML. Text that already
/// carries block-level HTML is passed through with code fences removed.
pub fn markdown_to_html(text: &str) -> String {
    let p = patterns();
    let unfenced = p.fence.replace_all(text, "");
    if p.html_block.is_match(&unfenced) {
        return unfenced.trim().to_string();
    }

    let mut out: Vec<String> = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut block = Block::None;

    fn close(out: &mut Vec<String>, paragraph: &mut Vec<String>, block: &mut Block) {
        match block {
            Block::Paragraph => out.push(format!("<p>{}</p>", paragraph.join("<br>"))),
            Block::Bullets => out.push("</ul>".to_string()),
            Block::Numbers => out.push("</ol>".to_string()),
            Block::None => {}
        }
        paragraph.clear();
        *block = Block::None;
    }

    for line in unfenced.lines() {
        if line.trim().is_empty() {
            close(&mut out, &mut paragraph, &mut block);
            continue;
        }
        if let Some(caps) = p.heading.captures(line) {
            close(&mut out, &mut paragraph, &mut block);
            let level = caps[1].len().min(3);
            out.push(format!("<h{0}>{1}</h{0}>", level, inline(&caps[2])));
        } else if let Some(caps) = p.bullet.captures(line) {
            if block != Block::Bullets {
                close(&mut out, &mut paragraph, &mut block);
                out.push("<ul>".to_string());
                block = Block::Bullets;
            }
            out.push(format!("<li>{}</li>", inline(&caps[1])));
        } else if let Some(caps) = p.numbered.captures(line) {
            if block != Block::Numbers {
                close(&mut out, &mut paragraph, &mut block);
                out.push("<ol>".to_string());
                block = Block::Numbers;
            }
            out.push(format!("<li>{}</li>", inline(&caps[1])));
        } else {
            if block != Block::Paragraph {
                close(&mut out, &mut paragraph, &mut block);
                block = Block::Paragraph;
            }
            paragraph.push(inline(line));
        }
    }
    close(&mut out, &mut paragraph, &mut block);

    out.join("\n")
}
