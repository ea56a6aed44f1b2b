// Text recognition seam for image-based jobs.

use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::OcrOutput;
use async_trait::async_trait;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in the referenced image. `language` is a hint, or
    /// "auto" for script detection.
    async fn recognize(&self, image_ref: &str, language: &str) -> TranslationResult<OcrOutput>;
}

/// Placeholder engine for deployments that only submit raw text. Image
/// jobs fail fast instead of hanging in the pipeline.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize(&self, _image_ref: &str, _language: &str) -> TranslationResult<OcrOutput> {
        Err(TranslationError::NoTextFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_ocr_rejects_images() {
        let engine = DisabledOcr;
        let result = engine.recognize("page-001.png", "ja").await;
        assert_eq!(result.unwrap_err(), TranslationError::NoTextFound);
    }
}
