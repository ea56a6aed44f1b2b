// Model selection and cost estimation.
//
// Token estimates use the coarse 4-characters-per-token heuristic; they
// feed budgeting stats only and never gate a dispatch.

use crate::core::types::ModelKind;

/// Estimated cost per 1000 tokens, in USD.
const FAST_RATE_PER_1K: f64 = 0.000075;
const QUALITY_RATE_PER_1K: f64 = 0.00125;

/// Word count above which text is routed to the quality model.
const LONG_TEXT_WORDS: usize = 100;

/// ceil(chars / 4), counting Unicode scalar values.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Estimated cost in USD for a token count on the given model.
pub fn estimate_cost(model: ModelKind, tokens: u64) -> f64 {
    let rate = match model {
        ModelKind::Fast => FAST_RATE_PER_1K,
        ModelKind::Quality => QUALITY_RATE_PER_1K,
    };
    tokens as f64 / 1000.0 * rate
}

pub struct ModelSelector;

impl ModelSelector {
    /// Quality for long text or text containing CJK scripts, fast otherwise.
    pub fn select(text: &str) -> ModelKind {
        if text.split_whitespace().count() > LONG_TEXT_WORDS || contains_cjk(text) {
            ModelKind::Quality
        } else {
            ModelKind::Fast
        }
    }
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        let cp = c as u32;
        // Han, Hiragana/Katakana, Hangul syllables
        (0x4E00..=0x9FFF).contains(&cp)
            || (0x3040..=0x30FF).contains(&cp)
            || (0xAC00..=0xD7AF).contains(&cp)
    })
}
