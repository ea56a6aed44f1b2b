// Central dispatch scheduler for provider requests.
//
// All provider traffic funnels through one queue and one dispatch loop,
// so rate-limit accounting has a single writer. The loop is spawned
// lazily on first submit and parks itself when the queue drains; a CAS
// on `running` guards against both double-spawn and the race where a
// submit lands between the final dequeue and the park.

use crate::core::errors::TranslationResult;
use crate::core::types::{ApiTier, ModelKind};
use crate::middleware::rate_limiter::RateLimiter;
use crate::orchestration::queue::{
    DispatchOutcome, PriorityRequestQueue, QueuedRequest, TranslationRequest,
};
use crate::services::translation::provider::TranslationProvider;
use crate::services::translation::selector::estimate_cost;
use crate::utils::usage::UsageTracker;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Floor for admission re-check sleeps, so a nearly-expired window entry
/// cannot spin the loop.
const MIN_ADMISSION_SLEEP: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct ApiRequestScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: PriorityRequestQueue,
    limiter: RateLimiter,
    usage: UsageTracker,
    tier: RwLock<ApiTier>,
    provider: Arc<dyn TranslationProvider>,
    fast_model: String,
    quality_model: String,
    /// Optional pause between dispatches (zero disables it).
    dispatch_interval: Duration,
    running: AtomicBool,
}

impl ApiRequestScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        usage: UsageTracker,
        tier: ApiTier,
        limiter: RateLimiter,
        fast_model: impl Into<String>,
        quality_model: impl Into<String>,
        dispatch_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: PriorityRequestQueue::new(),
                limiter,
                usage,
                tier: RwLock::new(tier),
                provider,
                fast_model: fast_model.into(),
                quality_model: quality_model.into(),
                dispatch_interval,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a request and make sure the dispatch loop is running. The
    /// returned receiver resolves with the outcome, or with Cancelled if
    /// the request is dropped by cancel_all before dispatch.
    pub fn submit(
        &self,
        request: TranslationRequest,
    ) -> oneshot::Receiver<TranslationResult<DispatchOutcome>> {
        let rx = self.inner.queue.enqueue(request);
        self.ensure_loop();
        rx
    }

    fn ensure_loop(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                Self::run_loop(inner).await;
            });
        }
    }

    async fn run_loop(inner: Arc<SchedulerInner>) {
        debug!("dispatch loop started");
        loop {
            if inner.queue.is_empty() {
                // Park. A submit racing with this store sees running=true
                // and skips the spawn, so re-check the queue and re-claim
                // the loop before actually exiting.
                inner.running.store(false, Ordering::Release);
                if inner.queue.is_empty() {
                    debug!("dispatch loop parked");
                    return;
                }
                if inner
                    .running
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                continue;
            }

            // Admission is settled before anything is dequeued, so requests
            // waiting out the rate limit are still reachable by cancel_all.
            loop {
                let now = Instant::now();
                let tier = inner.tier.read().clone();
                if inner.limiter.can_admit(&tier, &inner.usage, now) {
                    break;
                }
                let delay = inner
                    .limiter
                    .next_admission_delay(&tier, &inner.usage, now)
                    .max(MIN_ADMISSION_SLEEP);
                debug!(?delay, "rate limited, waiting for admission");
                tokio::time::sleep(delay).await;
            }

            // Queue may have been cancelled while waiting
            let queued = match inner.queue.dequeue_next() {
                Some(queued) => queued,
                None => continue,
            };
            inner.limiter.record_admission(&inner.usage, Instant::now());

            Self::dispatch(&inner, queued).await;

            if !inner.dispatch_interval.is_zero() {
                tokio::time::sleep(inner.dispatch_interval).await;
            }
        }
    }

    /// Send one admitted request to the provider, falling back from the
    /// fast to the quality model at most once. The fallback reuses the
    /// admission already consumed for this dispatch.
    async fn dispatch(inner: &SchedulerInner, queued: QueuedRequest) {
        let QueuedRequest {
            request, handle, ..
        } = queued;

        let (model_id, model_kind) = match request.model {
            ModelKind::Fast => (inner.fast_model.as_str(), ModelKind::Fast),
            ModelKind::Quality => (inner.quality_model.as_str(), ModelKind::Quality),
        };

        let mut served_by = model_kind;
        let result = match inner.provider.translate(&request.prompt, model_id).await {
            Ok(response) => Ok(response),
            Err(e) if model_kind == ModelKind::Fast => {
                warn!(error = %e, fallback = %inner.quality_model, "fast model failed, falling back");
                served_by = ModelKind::Quality;
                inner
                    .provider
                    .translate(&request.prompt, &inner.quality_model)
                    .await
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(response) => {
                let served_id = match served_by {
                    ModelKind::Fast => &inner.fast_model,
                    ModelKind::Quality => &inner.quality_model,
                };
                inner.usage.record_model(served_id);
                inner
                    .usage
                    .record_language_pair(&request.source_lang, &request.target_lang);
                inner
                    .usage
                    .record_cost(estimate_cost(served_by, response.tokens_used));
                Ok(DispatchOutcome {
                    text: response.text,
                    tokens_used: response.tokens_used,
                    model: served_by,
                })
            }
            Err(e) => Err(e),
        };

        // Receiver may have gone away; nothing to do about it.
        let _ = handle.send(outcome);
    }

    /// Drop every queued request, resolving each with Cancelled. An
    /// in-flight dispatch completes normally.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.queue.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "pending requests cancelled");
        }
        cancelled
    }

    /// Switch tiers. Usage history carries over, so a downgrade can leave
    /// the scheduler immediately over its new ceilings.
    pub fn set_tier(&self, tier: ApiTier) {
        info!(tier = %tier.label, "api tier changed");
        *self.inner.tier.write() = tier;
    }

    pub fn tier(&self) -> ApiTier {
        self.inner.tier.read().clone()
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.inner.usage
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TranslationError;
    use crate::services::translation::provider::ProviderResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted provider: records every (prompt, model) call and fails
    /// requests whose prompt starts with "fail".
    struct ScriptedProvider {
        calls: Mutex<Vec<(String, String)>>,
        call_delay: Duration,
        fail_models: Vec<String>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                call_delay: Duration::from_millis(0),
                fail_models: Vec::new(),
            }
        }

        fn failing_on(models: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                call_delay: Duration::from_millis(0),
                fail_models: models.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                call_delay: delay,
                fail_models: Vec::new(),
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl TranslationProvider for ScriptedProvider {
        async fn translate(
            &self,
            prompt: &str,
            model: &str,
        ) -> TranslationResult<ProviderResponse> {
            self.calls
                .lock()
                .push((prompt.to_string(), model.to_string()));
            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }
            if self.fail_models.iter().any(|m| m == model) {
                return Err(TranslationError::Provider(format!("{model} unavailable")));
            }
            Ok(ProviderResponse {
                text: format!("[{model}] {prompt}"),
                tokens_used: 100,
            })
        }
    }

    fn scheduler_with(provider: Arc<ScriptedProvider>) -> ApiRequestScheduler {
        ApiRequestScheduler::new(
            provider,
            UsageTracker::new(),
            ApiTier::paid(),
            RateLimiter::default(),
            "fast-model",
            "quality-model",
            Duration::ZERO,
        )
    }

    fn request(prompt: &str, model: ModelKind, priority: i32) -> TranslationRequest {
        TranslationRequest {
            prompt: prompt.to_string(),
            model,
            priority,
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_resolves_with_outcome() {
        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        let outcome = rx.await.unwrap().unwrap();

        assert_eq!(outcome.text, "[fast-model] hello");
        assert_eq!(outcome.model, ModelKind::Fast);
        assert_eq!(outcome.tokens_used, 100);
        assert_eq!(scheduler.usage().snapshot().requests_today, 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_queued_backlog() {
        let provider = Arc::new(ScriptedProvider::slow(Duration::from_millis(20)));
        let scheduler = scheduler_with(Arc::clone(&provider));

        // No awaits between submits, so all three are queued before the
        // loop first runs; dispatch order is then priority, then arrival.
        let rx_a = scheduler.submit(request("a", ModelKind::Fast, 0));
        let rx_b = scheduler.submit(request("b", ModelKind::Fast, 5));
        let rx_c = scheduler.submit(request("c", ModelKind::Fast, 0));

        rx_a.await.unwrap().unwrap();
        rx_b.await.unwrap().unwrap();
        rx_c.await.unwrap().unwrap();

        let order: Vec<String> = provider.calls().into_iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_fallback_uses_quality_once_per_admission() {
        let provider = Arc::new(ScriptedProvider::failing_on(&["fast-model"]));
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        let outcome = rx.await.unwrap().unwrap();

        assert_eq!(outcome.model, ModelKind::Quality);
        assert_eq!(outcome.text, "[quality-model] hello");

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "fast-model");
        assert_eq!(calls[1].1, "quality-model");

        // One admission covers both attempts
        let snapshot = scheduler.usage().snapshot();
        assert_eq!(snapshot.requests_today, 1);
        assert_eq!(snapshot.model_usage["quality-model"], 1);
        assert!(!snapshot.model_usage.contains_key("fast-model"));
    }

    #[tokio::test]
    async fn test_both_models_failing_propagates_error() {
        let provider = Arc::new(ScriptedProvider::failing_on(&[
            "fast-model",
            "quality-model",
        ]));
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, TranslationError::Provider(_)));
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_quality_request_gets_no_fallback() {
        let provider = Arc::new(ScriptedProvider::failing_on(&["quality-model"]));
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("hello", ModelKind::Quality, 0));
        assert!(rx.await.unwrap().is_err());
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_spares_in_flight_dispatch() {
        let provider = Arc::new(ScriptedProvider::slow(Duration::from_millis(100)));
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx1 = scheduler.submit(request("a", ModelKind::Fast, 0));
        let rx2 = scheduler.submit(request("b", ModelKind::Fast, 0));
        let rx3 = scheduler.submit(request("c", ModelKind::Fast, 0));

        // Let the loop pick up "a", then drop the backlog
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(scheduler.cancel_all(), 2);

        assert!(rx1.await.unwrap().is_ok());
        assert_eq!(rx2.await.unwrap().unwrap_err(), TranslationError::Cancelled);
        assert_eq!(rx3.await.unwrap().unwrap_err(), TranslationError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_reaches_requests_waiting_on_admission() {
        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = ApiRequestScheduler::new(
            provider.clone(),
            UsageTracker::new(),
            ApiTier::new("test", 1, 100),
            RateLimiter::default(),
            "fast-model",
            "quality-model",
            Duration::ZERO,
        );

        // Minute window is full for another ~500ms
        let backdated = Instant::now() - Duration::from_millis(59_500);
        scheduler.usage().record_admission(backdated);

        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.cancel_all(), 1);

        assert_eq!(rx.await.unwrap().unwrap_err(), TranslationError::Cancelled);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_loop_rearms_after_parking() {
        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("first", ModelKind::Fast, 0));
        rx.await.unwrap().unwrap();

        // Give the loop time to drain and park
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rx = scheduler.submit(request("second", ModelKind::Fast, 0));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.text, "[fast-model] second");
    }

    #[tokio::test]
    async fn test_tier_change_keeps_usage_history() {
        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = scheduler_with(Arc::clone(&provider));

        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        rx.await.unwrap().unwrap();

        scheduler.set_tier(ApiTier::free());
        assert_eq!(scheduler.tier().label, "free");
        assert_eq!(scheduler.usage().snapshot().requests_today, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_delays_but_eventually_dispatches() {
        let provider = Arc::new(ScriptedProvider::new());
        let scheduler = ApiRequestScheduler::new(
            provider.clone(),
            UsageTracker::new(),
            ApiTier::new("test", 1, 100),
            RateLimiter::default(),
            "fast-model",
            "quality-model",
            Duration::ZERO,
        );

        // Fill the minute window with an admission 59.9s in the past
        let backdated = Instant::now() - Duration::from_millis(59_900);
        scheduler.usage().record_admission(backdated);

        let start = Instant::now();
        let rx = scheduler.submit(request("hello", ModelKind::Fast, 0));
        let outcome = rx.await.unwrap().unwrap();

        assert_eq!(outcome.text, "[fast-model] hello");
        // Dispatch had to wait for the backdated entry to age out
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
