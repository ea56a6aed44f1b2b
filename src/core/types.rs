// Shared types for the translation scheduling core

use serde::{Deserialize, Serialize};

/// What the caller wants translated: raw text, or a reference to a page
/// image that still needs text recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobSource {
    Text(String),
    /// Stable reference (path, URL, or content id) handed to the OCR engine.
    ImageRef(String),
}

/// Contextual category of source text, passed through to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BubbleType {
    Dialogue,
    Thought,
    Narration,
    SoundEffect,
    Title,
}

impl BubbleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BubbleType::Dialogue => "dialogue",
            BubbleType::Thought => "thought",
            BubbleType::Narration => "narration",
            BubbleType::SoundEffect => "sound effect",
            BubbleType::Title => "title",
        }
    }
}

/// Optional manga metadata that shapes translation style.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MangaContext {
    pub series_title: Option<String>,
    pub genre: Option<String>,
    /// (source name, preferred translated name) pairs.
    #[serde(default)]
    pub character_glossary: Vec<(String, String)>,
    pub previous_line: Option<String>,
    pub bubble_type: Option<BubbleType>,
}

/// A unit of translation work as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationJob {
    pub source: JobSource,
    /// Source language code, or "auto".
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub context: Option<MangaContext>,
    /// Higher values are dispatched first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl TranslationJob {
    pub fn text(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source: JobSource::Text(text.into()),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            context: None,
            priority: 0,
            cache_enabled: true,
        }
    }

    pub fn image(image_ref: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            source: JobSource::ImageRef(image_ref.into()),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            context: None,
            priority: 0,
            cache_enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: MangaContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// A text region recognized on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    /// [x1, y1, x2, y2] in source image coordinates.
    pub bbox: [i32; 4],
}

/// Output of the OCR collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub full_text: String,
    pub regions: Vec<TextRegion>,
}

/// A translated region with its original position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedRegion {
    pub original_text: String,
    pub translated_text: String,
    pub bbox: [i32; 4],
}

/// Final result of a translation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub original_text: String,
    pub translated_text: String,
    pub regions: Vec<TranslatedRegion>,
    /// Model that produced the translation (post-fallback).
    pub model: String,
    pub tokens_used: u64,
    pub from_cache: bool,
}

/// Which of the two configured models a request prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Fast,
    Quality,
}

/// Pipeline stages, each weighted as one quarter of overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Preprocessing,
    TextRecognition,
    Translation,
    Rendering,
}

impl PipelineStage {
    pub fn index(&self) -> usize {
        match self {
            PipelineStage::Preprocessing => 0,
            PipelineStage::TextRecognition => 1,
            PipelineStage::Translation => 2,
            PipelineStage::Rendering => 3,
        }
    }
}

/// A stage plus an in-stage completion fraction in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub stage: PipelineStage,
    pub fraction: f32,
}

impl PipelineProgress {
    pub fn new(stage: PipelineStage, fraction: f32) -> Self {
        Self {
            stage,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }

    /// Overall progress: every stage occupies a fixed quarter of [0, 1],
    /// regardless of its actual cost.
    pub fn overall(&self) -> f32 {
        self.stage.index() as f32 * 0.25 + self.fraction.clamp(0.0, 1.0) * 0.25
    }
}

/// Rate-limit tier configuration. Immutable; switching tiers never resets
/// usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTier {
    pub label: String,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl ApiTier {
    pub fn new(label: impl Into<String>, requests_per_minute: u32, requests_per_day: u32) -> Self {
        Self {
            label: label.into(),
            requests_per_minute,
            requests_per_day,
        }
    }

    pub fn free() -> Self {
        Self::new("free", 15, 1_500)
    }

    pub fn paid() -> Self {
        Self::new("paid", 1_000, 50_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_mapping() {
        let p = PipelineProgress::new(PipelineStage::Preprocessing, 0.0);
        assert_eq!(p.overall(), 0.0);

        let p = PipelineProgress::new(PipelineStage::TextRecognition, 0.5);
        assert!((p.overall() - 0.375).abs() < f32::EPSILON);

        let p = PipelineProgress::new(PipelineStage::Rendering, 1.0);
        assert!((p.overall() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_progress_fraction_clamped() {
        let p = PipelineProgress::new(PipelineStage::Translation, 1.7);
        assert!((p.overall() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_tier_presets() {
        let free = ApiTier::free();
        assert_eq!(free.requests_per_minute, 15);
        assert!(free.requests_per_day > free.requests_per_minute);
    }
}
