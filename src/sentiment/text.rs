//! Topic, summary and key-phrase extraction for the analysis endpoint.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

const TOPIC_CATEGORIES: &[(&str, &[&str])] = &[
    ("tecnología", &["software", "programación", "código", "app", "web", "api", "tecnología"]),
    ("negocios", &["empresa", "negocio", "cliente", "venta", "proyecto", "trabajo"]),
    ("educación", &["aprender", "estudiar", "curso", "educación", "enseñar"]),
    ("salud", &["salud", "médico", "doctor", "hospital", "medicina"]),
];

const STOP_WORDS: &[&str] = &[
    "el", "la", "de", "en", "y", "a", "que", "es", "por", "para", "the", "of", "and", "to", "in",
    "is", "for", "with", "that", "on", "un", "una", "los", "las", "del", "al", "se", "con", "su",
    "lo",
];

const MAX_KEY_PHRASES: usize = 5;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+").expect("sentence pattern is valid"));

/// Categories whose keywords appear in `text`; `["general"]` when none do.
pub fn extract_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let topics: Vec<String> = TOPIC_CATEGORIES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(topic, _)| topic.to_string())
        .collect();
    if topics.is_empty() {
        vec!["general".to_string()]
    } else {
        topics
    }
}

/// First two sentences, or the whole text when it has two or fewer.
pub fn summarize(text: &str) -> String {
    let sentences: Vec<&str> = SENTENCE.find_iter(text).map(|m| m.as_str().trim()).collect();
    if sentences.len() <= 2 {
        return text.to_string();
    }
    sentences[..2].join(" ")
}

/// Most frequent non-stopword words longer than three characters, ties
/// broken by first appearance.
pub fn extract_key_phrases(text: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut freq: HashMap<String, usize> = HashMap::new();

    for word in text.to_lowercase().split_whitespace() {
        let clean: String = word.chars().filter(|c| !".,!?;:\"".contains(*c)).collect();
        if clean.chars().count() <= 3 || STOP_WORDS.contains(&clean.as_str()) {
            continue;
        }
        let count = freq.entry(clean.clone()).or_insert(0);
        if *count == 0 {
            order.push(clean);
        }
        *count += 1;
    }

    // Stable sort keeps first-appearance order among equal counts.
    order.sort_by(|a, b| freq[b].cmp(&freq[a]));
    order.truncate(MAX_KEY_PHRASES);
    order
}
