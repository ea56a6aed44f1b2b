pub mod batcher;
pub mod pipeline;
pub mod queue;
pub mod scheduler;

pub use batcher::RequestBatcher;
pub use pipeline::TranslationPipeline;
pub use queue::{DispatchOutcome, PriorityRequestQueue, TranslationRequest};
pub use scheduler::ApiRequestScheduler;
