pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

pub use crate::core::{Config, TranslationError, TranslationJob, TranslationOutcome};
pub use crate::orchestration::TranslationPipeline;
