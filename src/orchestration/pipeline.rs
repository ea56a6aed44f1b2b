// End-to-end translation pipeline.
//
// Stages run in a fixed order: preprocessing (content identity and cache
// lookup), text recognition, translation (batched through the scheduler),
// rendering (result assembly and cache store). Progress listeners see
// each stage as a fixed quarter of overall completion. A cache hit skips
// straight to completed rendering without consuming any scheduler
// admission.

use crate::core::config::Config;
use crate::core::errors::{CacheResult, TranslationError, TranslationResult};
use crate::core::types::{
    JobSource, MangaContext, ModelKind, PipelineProgress, PipelineStage, TextRegion,
    TranslatedRegion, TranslationJob, TranslationOutcome,
};
use crate::middleware::rate_limiter::RateLimiter;
use crate::orchestration::batcher::RequestBatcher;
use crate::orchestration::queue::TranslationRequest;
use crate::orchestration::scheduler::ApiRequestScheduler;
use crate::services::ocr::OcrEngine;
use crate::services::translation::cache::{
    cache_key, content_identity, CacheEntry, CacheStats, TranslationCache,
};
use crate::services::translation::provider::TranslationProvider;
use crate::services::translation::selector::ModelSelector;
use crate::utils::usage::{UsageSnapshot, UsageTracker};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

type ProgressListener = Arc<dyn Fn(PipelineProgress) + Send + Sync>;

#[derive(Clone)]
pub struct TranslationPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    ocr: Arc<dyn OcrEngine>,
    cache: TranslationCache,
    scheduler: ApiRequestScheduler,
    listeners: RwLock<Vec<ProgressListener>>,
    max_batch_size: usize,
    max_batch_wait: Duration,
    fast_model: String,
    quality_model: String,
}

impl TranslationPipeline {
    /// Wire the pipeline from configuration, loading the cache from disk.
    pub async fn new(
        config: &Config,
        ocr: Arc<dyn OcrEngine>,
        provider: Arc<dyn TranslationProvider>,
    ) -> CacheResult<Self> {
        let usage = UsageTracker::new();
        let cache = TranslationCache::new(
            &config.cache.cache_dir,
            config.cache.max_entries,
            Duration::from_secs(config.cache.save_interval_secs),
            Some(usage.clone()),
        )
        .await?;
        let scheduler = ApiRequestScheduler::new(
            provider,
            usage,
            config.rate_limit.tier.clone(),
            RateLimiter::new(Duration::from_secs(config.rate_limit.recheck_interval_secs)),
            config.fast_model(),
            config.quality_model(),
            Duration::from_millis(config.batch.dispatch_interval_ms),
        );
        Ok(Self::from_parts(
            ocr,
            cache,
            scheduler,
            config.batch.max_batch_size,
            Duration::from_millis(config.batch.max_wait_ms),
            config.fast_model(),
            config.quality_model(),
        ))
    }

    /// Assemble from pre-built collaborators.
    pub fn from_parts(
        ocr: Arc<dyn OcrEngine>,
        cache: TranslationCache,
        scheduler: ApiRequestScheduler,
        max_batch_size: usize,
        max_batch_wait: Duration,
        fast_model: impl Into<String>,
        quality_model: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                ocr,
                cache,
                scheduler,
                listeners: RwLock::new(Vec::new()),
                max_batch_size,
                max_batch_wait,
                fast_model: fast_model.into(),
                quality_model: quality_model.into(),
            }),
        }
    }

    /// Register a progress listener. Listeners are called synchronously on
    /// the job's task, so they should be cheap.
    pub fn on_progress(&self, listener: impl Fn(PipelineProgress) + Send + Sync + 'static) {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    fn emit(&self, stage: PipelineStage, fraction: f32) {
        let progress = PipelineProgress::new(stage, fraction);
        for listener in self.inner.listeners.read().iter() {
            listener(progress);
        }
    }

    /// Run one job through all four stages.
    #[instrument(skip(self, job), fields(priority = job.priority, target = %job.target_lang))]
    pub async fn submit_translation(
        &self,
        job: TranslationJob,
    ) -> TranslationResult<TranslationOutcome> {
        // Stage 1: content identity and cache lookup
        self.emit(PipelineStage::Preprocessing, 0.0);
        let identity = match &job.source {
            JobSource::Text(text) => content_identity(text.as_bytes()),
            JobSource::ImageRef(image_ref) => content_identity(image_ref.as_bytes()),
        };
        let key = cache_key(identity, &job.source_lang, &job.target_lang);

        if job.cache_enabled {
            if let Some(entry) = self.inner.cache.lookup(&key) {
                info!(key, "serving translation from cache");
                self.emit(PipelineStage::Rendering, 1.0);
                return Ok(TranslationOutcome {
                    regions: vec![TranslatedRegion {
                        original_text: entry.original_text.clone(),
                        translated_text: entry.translated_text.clone(),
                        bbox: [0, 0, 0, 0],
                    }],
                    original_text: entry.original_text,
                    translated_text: entry.translated_text,
                    model: entry.model,
                    tokens_used: 0,
                    from_cache: true,
                });
            }
        }
        self.emit(PipelineStage::Preprocessing, 1.0);

        // Stage 2: text recognition
        self.emit(PipelineStage::TextRecognition, 0.0);
        let (full_text, regions) = match &job.source {
            JobSource::Text(text) => {
                if text.trim().is_empty() {
                    return Err(TranslationError::NoTextFound);
                }
                (
                    text.clone(),
                    vec![TextRegion {
                        text: text.clone(),
                        bbox: [0, 0, 0, 0],
                    }],
                )
            }
            JobSource::ImageRef(image_ref) => {
                let output = self
                    .inner
                    .ocr
                    .recognize(image_ref, &job.source_lang)
                    .await?;
                if output.regions.is_empty() || output.full_text.trim().is_empty() {
                    return Err(TranslationError::NoTextFound);
                }
                (output.full_text, output.regions)
            }
        };
        self.emit(PipelineStage::TextRecognition, 1.0);

        // Stage 3: batched translation through the scheduler
        self.emit(PipelineStage::Translation, 0.0);
        let batches = self.split_into_batches(regions);
        let total_batches = batches.len();
        debug!(total_batches, "translation batches prepared");

        let mut receivers = Vec::with_capacity(total_batches);
        for batch in &batches {
            let prompt = build_prompt(batch, job.context.as_ref(), &job.target_lang);
            let batch_text: String = batch
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let request = TranslationRequest {
                prompt,
                model: ModelSelector::select(&batch_text),
                priority: job.priority,
                source_lang: job.source_lang.clone(),
                target_lang: job.target_lang.clone(),
            };
            receivers.push(self.inner.scheduler.submit(request));
        }

        let mut translated_regions = Vec::new();
        let mut tokens_used = 0u64;
        let mut used_quality = false;
        for (i, (batch, rx)) in batches.into_iter().zip(receivers).enumerate() {
            let outcome = rx
                .await
                .map_err(|_| TranslationError::Cancelled)?
                .map_err(|e| {
                    warn!(batch = i, error = %e, "batch translation failed");
                    e
                })?;
            tokens_used += outcome.tokens_used;
            used_quality |= outcome.model == ModelKind::Quality;

            let originals: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let translations = parse_batch_translation(&outcome.text, &originals);
            for (region, translated_text) in batch.into_iter().zip(translations) {
                translated_regions.push(TranslatedRegion {
                    original_text: region.text,
                    translated_text,
                    bbox: region.bbox,
                });
            }
            self.emit(
                PipelineStage::Translation,
                (i + 1) as f32 / total_batches as f32,
            );
        }

        // Stage 4: assembly and cache store
        self.emit(PipelineStage::Rendering, 0.0);
        let translated_text = translated_regions
            .iter()
            .map(|r| r.translated_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let model = if used_quality {
            self.inner.quality_model.clone()
        } else {
            self.inner.fast_model.clone()
        };

        if job.cache_enabled {
            self.inner.cache.store(
                key,
                CacheEntry {
                    original_text: full_text.clone(),
                    translated_text: translated_text.clone(),
                    model: model.clone(),
                    confidence: 1.0,
                    usage_count: 0,
                },
            );
        }
        self.emit(PipelineStage::Rendering, 1.0);

        Ok(TranslationOutcome {
            original_text: full_text,
            translated_text,
            regions: translated_regions,
            model,
            tokens_used,
            from_cache: false,
        })
    }

    fn split_into_batches(&self, regions: Vec<TextRegion>) -> Vec<Vec<TextRegion>> {
        let mut batcher = RequestBatcher::new(self.inner.max_batch_size, self.inner.max_batch_wait);
        let now = Instant::now();
        let mut batches = Vec::new();
        for region in regions {
            if let Some(batch) = batcher.add(region, now) {
                batches.push(batch);
            }
        }
        if let Some(rest) = batcher.flush() {
            batches.push(rest);
        }
        batches
    }

    /// Drop every request still waiting in the scheduler queue.
    pub fn cancel_all(&self) -> usize {
        self.inner.scheduler.cancel_all()
    }

    pub fn set_tier(&self, tier: crate::core::types::ApiTier) {
        self.inner.scheduler.set_tier(tier);
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        self.inner.scheduler.usage().snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub async fn save_cache(&self) -> CacheResult<()> {
        self.inner.cache.save().await
    }
}

/// Build the provider prompt for one batch of regions. Lines are numbered
/// so the response can be mapped back to regions.
fn build_prompt(batch: &[TextRegion], context: Option<&MangaContext>, target_lang: &str) -> String {
    let mut prompt = format!(
        "Translate the following manga text lines into {target_lang}. \
         Keep honorifics and onomatopoeia natural. \
         Reply with the same numbered lines, translations only.\n"
    );

    if let Some(ctx) = context {
        if let Some(series) = &ctx.series_title {
            prompt.push_str(&format!("Series: {series}\n"));
        }
        if let Some(genre) = &ctx.genre {
            prompt.push_str(&format!("Genre: {genre}\n"));
        }
        if !ctx.character_glossary.is_empty() {
            prompt.push_str("Character names:\n");
            for (source, preferred) in &ctx.character_glossary {
                prompt.push_str(&format!("  {source} => {preferred}\n"));
            }
        }
        if let Some(previous) = &ctx.previous_line {
            prompt.push_str(&format!("Previous line: {previous}\n"));
        }
        if let Some(bubble) = &ctx.bubble_type {
            prompt.push_str(&format!("Text type: {}\n", bubble.as_str()));
        }
    }

    prompt.push('\n');
    for (i, region) in batch.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, region.text));
    }
    prompt
}

/// Map a numbered response back onto the batch. Lines the model skipped
/// or renumbered fall back to the original text, so a sloppy response
/// degrades to passthrough instead of misaligned translations.
fn parse_batch_translation(response: &str, originals: &[String]) -> Vec<String> {
    let mut slots: Vec<Option<String>> = vec![None; originals.len()];
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((num, text)) = split_numbered(line) {
            if num >= 1 && num <= originals.len() && !text.is_empty() {
                slots[num - 1] = Some(text);
            }
        }
    }

    // Unnumbered single-line responses are common for single-item batches
    if originals.len() == 1 && slots[0].is_none() && !response.trim().is_empty() {
        slots[0] = Some(response.trim().to_string());
    }

    slots
        .into_iter()
        .zip(originals)
        .map(|(slot, original)| slot.unwrap_or_else(|| original.clone()))
        .collect()
}

fn split_numbered(line: &str) -> Option<(usize, String)> {
    let sep = line.find(['.', ')'])?;
    let num = line[..sep].trim().parse::<usize>().ok()?;
    Some((num, line[sep + 1..].trim().to_string()))
}
