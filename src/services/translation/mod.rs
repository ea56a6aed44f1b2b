pub mod cache;
pub mod provider;
pub mod selector;

pub use cache::{cache_key, content_identity, CacheEntry, CacheStats, TranslationCache};
pub use provider::{GeminiClient, ProviderResponse, TranslationProvider};
pub use selector::{estimate_cost, estimate_tokens, ModelSelector};
