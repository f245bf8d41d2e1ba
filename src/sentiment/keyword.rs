//! Keyword heuristic sentiment analyzer for Spanish and English text.
//!
//! Score is the majority polarity's share of matched keywords, signed;
//! magnitude is the share of matched keywords among all words.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::AppError;
use crate::models::{Entity, EntityType, SentimentAnalysis};
use crate::sentiment::SentimentAnalyzer;

const POSITIVE_WORDS: &[&str] = &[
    "excelente", "genial", "increíble", "fantástico", "maravilloso", "feliz", "contento",
    "alegre", "bueno", "perfecto", "amor", "gracias", "mejor", "éxito", "logro", "great",
    "good", "excellent", "happy", "love", "wonderful", "amazing", "fantastic",
];

const NEGATIVE_WORDS: &[&str] = &[
    "malo", "terrible", "horrible", "pésimo", "triste", "enojado", "frustrado", "problema",
    "error", "falla", "peor", "odio", "bad", "sad", "angry", "frustrated", "problem", "fail",
    "worst", "hate",
];

/// Capitalized words that start sentences rather than name anyone.
const COMMON_CAPITALIZED: &[&str] = &["El", "La", "Los", "Las", "The", "A", "An"];

fn word_alternation(words: &[&str]) -> Regex {
    let alternation = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("keyword pattern is valid")
}

static POSITIVE: LazyLock<Regex> = LazyLock::new(|| word_alternation(POSITIVE_WORDS));
static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| word_alternation(NEGATIVE_WORDS));
static SPANISH_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    word_alternation(&["el", "la", "los", "las", "de", "en", "que", "es", "por", "para", "con"])
});
static ENGLISH_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    word_alternation(&["the", "of", "and", "to", "in", "is", "for", "with", "that", "on"])
});
static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)*\b").expect("name pattern is valid")
});
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    word_alternation(&["México", "España", "Estados Unidos", "USA", "Ciudad", "City", "País", "Country"])
});
static ORGANIZATION: LazyLock<Regex> = LazyLock::new(|| {
    word_alternation(&["Company", "Empresa", "Corporation", "Corp", "Inc", "Ltd", "LLC", "SA", "SL"])
});

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSentimentAnalyzer;

impl KeywordSentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`SentimentAnalyzer::analyze`].
    pub fn score(&self, text: &str) -> Result<SentimentAnalysis, AppError> {
        let total_words = text.split_whitespace().count();
        if total_words == 0 {
            return Err(AppError::SentimentFailed {
                message: "text has no words to analyze".to_string(),
            });
        }

        let lower = text.to_lowercase();
        let positive = POSITIVE.find_iter(&lower).count();
        let negative = NEGATIVE.find_iter(&lower).count();
        let matched = positive + negative;

        let score = if positive > negative {
            positive as f64 / matched as f64
        } else if negative > positive {
            -(negative as f64 / matched as f64)
        } else {
            0.0
        };

        let entities = extract_entities(text);
        Ok(SentimentAnalysis {
            entities: (!entities.is_empty()).then_some(entities),
            language: detect_language(text).map(str::to_string),
            ..SentimentAnalysis::from_score(score, matched as f64 / total_words as f64)
        })
    }
}

#[async_trait]
impl SentimentAnalyzer for KeywordSentimentAnalyzer {
    async fn analyze(&self, text: &str) -> Result<SentimentAnalysis, AppError> {
        self.score(text)
    }
}

/// `"es"` or `"en"` by stopword count; `None` on a tie.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let spanish = SPANISH_MARKERS.find_iter(text).count();
    let english = ENGLISH_MARKERS.find_iter(text).count();
    match spanish.cmp(&english) {
        std::cmp::Ordering::Greater => Some("es"),
        std::cmp::Ordering::Less => Some("en"),
        std::cmp::Ordering::Equal => None,
    }
}

pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut entities: Vec<Entity> = NAME
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|name| !COMMON_CAPITALIZED.contains(name))
        .map(|name| Entity {
            name: name.to_string(),
            entity_type: EntityType::Person,
            salience: 0.8,
        })
        .collect();

    entities.extend(LOCATION.find_iter(text).map(|m| Entity {
        name: m.as_str().to_string(),
        entity_type: EntityType::Location,
        salience: 0.7,
    }));
    entities.extend(ORGANIZATION.find_iter(text).map(|m| Entity {
        name: m.as_str().to_string(),
        entity_type: EntityType::Organization,
        salience: 0.6,
    }));
    entities
}
