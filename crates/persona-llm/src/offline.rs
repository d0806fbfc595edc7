//! Template responses for running without an API key.
//!
//! Portraits come from fixed stock photo pools chosen by prompt keywords; the
//! text endpoints fill canned paragraphs with the character's name.

use async_trait::async_trait;
use rand::seq::SliceRandom;

use persona_core::{CharacterPatch, CharacterTrait, ChatContext, ContentProvider, ProviderError, Relationship};

const GENERAL_PORTRAITS: &[&str] = &[
    "photo-1506794778202-cad84cf45f1d",
    "photo-1507003211169-0a1dd7228f2d",
    "photo-1500648767791-00dcc994a43e",
    "photo-1544005313-94ddf0286df2",
    "photo-1580489944761-15a19d654956",
    "photo-1534751516642-a1af1ef26a56",
];

const FANTASY_PORTRAITS: &[&str] = &[
    "photo-1578632767115-351597cf2477",
    "photo-1542103749-8ef59b94f47e",
    "photo-1514136649217-b627b4b9cfb2",
    "photo-1576078044571-8ea98b0b0963",
    "photo-1596375764789-0062e14fce0d",
    "photo-1615267807911-3f7e05904288",
];

const SCIFI_PORTRAITS: &[&str] = &[
    "photo-1511207538754-e8555f2bc187",
    "photo-1544646290-6ae257aabc9e",
    "photo-1541367777708-7aaff32d2e9d",
    "photo-1515879218367-8466d910aaa4",
    "photo-1518141532615-4305c9f914c8",
    "photo-1522277245709-6a4ddf73165a",
];

const FANTASY_KEYWORDS: &[&str] = &["fantasy", "wizard", "elf", "dwarf"];
const SCIFI_KEYWORDS: &[&str] = &["sci-fi", "future", "space", "tech"];

const DEFAULT_BACKSTORY: &str = "The character grew up in a small town with loving parents who encouraged their \
    interests. When they were a teenager, a life-changing event occurred that set them on their current path. \
    They've since been driven by a mix of personal goals and a desire to make a difference in the world.";

const BACKSTORY_SUFFIX: &str = "\n\nAdditionally, formative experiences in their early adulthood shaped their \
    worldview significantly. They've always carried a sense of destiny that both motivates and burdens them.";

#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Stock photo pool for a portrait prompt. Sci-fi keywords win over fantasy.
pub fn portrait_pool(prompt: &str) -> &'static [&'static str] {
    let lower = prompt.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if mentions(SCIFI_KEYWORDS) {
        SCIFI_PORTRAITS
    } else if mentions(FANTASY_KEYWORDS) {
        FANTASY_PORTRAITS
    } else {
        GENERAL_PORTRAITS
    }
}

fn portrait_url(photo: &str) -> String {
    format!("https://images.unsplash.com/{photo}?ixlib=rb-1.2.1&auto=format&fit=crop&w=600&q=60")
}

fn rated(name: &str, value: i64, description: &str) -> CharacterTrait {
    CharacterTrait {
        name: name.into(),
        value,
        description: Some(description.into()),
    }
}

fn related(name: &str, relation: &str, description: &str, strength: i64) -> Relationship {
    Relationship {
        name: name.into(),
        relation: relation.into(),
        description: Some(description.into()),
        strength: Some(strength),
    }
}

#[async_trait]
impl ContentProvider for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }

    async fn chat_reply(&self, context: &ChatContext, user_text: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "{} considers your words for a moment. \"{}\" they repeat quietly. \
             \"That is not a simple question. Let me think on it before I answer you properly.\"",
            context.character_name,
            user_text.trim()
        ))
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        let pool = portrait_pool(prompt);
        let photo = pool
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| ProviderError::InvalidResponse("empty portrait pool".into()))?;
        Ok(portrait_url(photo))
    }

    async fn generate_traits(&self, _draft: &CharacterPatch) -> Result<Vec<CharacterTrait>, ProviderError> {
        Ok(vec![
            rated(
                "Determination",
                4,
                "This character is extremely determined and will pursue their goals relentlessly.",
            ),
            rated(
                "Caution",
                2,
                "While normally cautious, this character's determination can override this trait when pursuing important objectives.",
            ),
            rated(
                "Empathy",
                3,
                "Shows average empathy towards others, but can become detached when focused on their goals.",
            ),
            rated(
                "Intelligence",
                5,
                "Highly intelligent and analytical, able to solve complex problems with ease.",
            ),
        ])
    }

    async fn enhance_backstory(&self, backstory: &str) -> Result<String, ProviderError> {
        if backstory.trim().is_empty() {
            Ok(DEFAULT_BACKSTORY.to_string())
        } else {
            Ok(format!("{backstory}{BACKSTORY_SUFFIX}"))
        }
    }

    async fn generate_voice(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        Ok(format!(
            "{} speaks with a deliberate cadence, choosing words carefully. They tend to use complex vocabulary \
             when discussing topics they're passionate about, but simplify their language when explaining concepts \
             to others. When emotional, their speech becomes more clipped and direct. Common phrases include \
             \"Let's examine this further\" and \"I'm not convinced yet.\"",
            draft.display_name()
        ))
    }

    async fn generate_relationships(&self, _draft: &CharacterPatch) -> Result<Vec<Relationship>, ProviderError> {
        Ok(vec![
            related(
                "Morgan Wells",
                "Mentor",
                "An older, experienced figure who guided the character in their early development but now has a complicated relationship with them.",
                4,
            ),
            related(
                "Alex Rivera",
                "Rival",
                "Someone with similar goals but different methods, creating a competitive but respectful dynamic.",
                3,
            ),
            related(
                "Jamie Chen",
                "Friend",
                "A loyal companion who provides emotional support and occasional comic relief.",
                5,
            ),
        ])
    }

    async fn generate_arc(&self, draft: &CharacterPatch) -> Result<String, ProviderError> {
        Ok(format!(
            "{} begins their journey confident in their beliefs but naive about the complexities of the world. \
             The first turning point comes when they face their initial failure, forcing them to reevaluate their \
             approach. In the middle of their journey, they discover uncomfortable truths about themselves and must \
             reconcile their ideals with reality. By the climax, they've developed a more nuanced worldview, \
             achieving their goals but at a cost they didn't anticipate. Their final state shows growth in wisdom \
             and capability, though certain innocence has been lost.",
            draft.display_name()
        ))
    }

    async fn simulate(&self, draft: &CharacterPatch, _scenario: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "Given {}'s personality and backstory, they would approach this scenario with caution initially. \
             Their first instinct would be to analyze the situation before committing to any action. They would \
             likely ask clarifying questions and consider multiple perspectives, weighing the potential consequences \
             against their personal values and goals. In the end, they would take decisive action, though perhaps \
             with some reservations about the outcome.",
            draft.display_name()
        ))
    }
}
