//! Sentiment capability and the text analysis built on it.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::SentimentAnalysis;

pub mod keyword;
pub mod text;

pub use keyword::KeywordSentimentAnalyzer;

#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    /// Scores `text`. Fails when no analysis can be produced.
    async fn analyze(&self, text: &str) -> Result<SentimentAnalysis, AppError>;
}
