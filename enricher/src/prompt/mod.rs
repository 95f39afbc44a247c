mod classification;
mod classifier;
mod openai;
mod templates;

pub use classification::Classification;
pub use classifier::{ClassificationOutcome, RateLimitedClassifier};
pub use openai::OpenAiReasoner;
pub use templates::PromptBuilder;

use async_trait::async_trait;

use crate::error::ReasoningError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub system: String,
    pub user: String,
}

/// The external reasoning service. Returns the raw completion text, which
/// may or may not be the JSON object that was asked for.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &PromptRequest) -> Result<String, ReasoningError>;
}
