//! Analysis handlers behind the `Analyzer` seam
//!
//! The queue routes each job kind to one of these methods. The default
//! implementation is a deterministic lexicon heuristic; a model-backed
//! analyzer can be injected without touching the queue.

use async_trait::async_trait;
use serde_json::{json, Value};
use unibox_core::Result;

use crate::job::Job;

/// Analysis operations the queue can dispatch to
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Classify the overall sentiment of a message
    async fn sentiment(&self, job: &Job) -> Result<Value>;

    /// Assign the message to a coarse category
    async fn categorize(&self, job: &Job) -> Result<Value>;

    /// Propose short reply suggestions
    async fn suggest_reply(&self, job: &Job) -> Result<Value>;
}

const POSITIVE_WORDS: &[&str] = &[
    "love", "great", "good", "awesome", "thanks", "thank", "happy", "perfect", "nice",
    "excellent", "wonderful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "bad", "awful", "terrible", "angry", "broken", "wrong", "problem", "annoyed",
    "disappointed", "worst",
];

const CATEGORIES: &[(&str, &[&str])] = &[
    ("work", &["meeting", "deadline", "project", "report", "client", "schedule"]),
    ("finance", &["invoice", "payment", "bill", "refund", "price", "charge"]),
    ("support", &["help", "issue", "error", "broken", "fix", "problem"]),
    ("social", &["party", "dinner", "weekend", "birthday", "movie", "game"]),
];

/// Deterministic keyword-based analyzer
#[derive(Debug, Default, Clone)]
pub struct LexiconAnalyzer;

impl LexiconAnalyzer {
    /// Create a new lexicon analyzer
    pub fn new() -> Self {
        Self
    }

    fn words(content: &str) -> Vec<String> {
        content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl Analyzer for LexiconAnalyzer {
    async fn sentiment(&self, job: &Job) -> Result<Value> {
        let words = Self::words(&job.content);
        let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(&w.as_str())).count() as i64;
        let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(&w.as_str())).count() as i64;

        let score = positive - negative;
        let label = if score > 0 {
            "positive"
        } else if score < 0 {
            "negative"
        } else {
            "neutral"
        };

        let matched = (positive + negative) as f64;
        let confidence = if words.is_empty() {
            0.0
        } else {
            (matched / words.len() as f64).min(1.0)
        };

        Ok(json!({
            "sentiment": label,
            "score": score,
            "confidence": confidence,
        }))
    }

    async fn categorize(&self, job: &Job) -> Result<Value> {
        let words = Self::words(&job.content);

        let mut best: (&str, usize) = ("general", 0);
        let mut matched_keywords: Vec<&str> = Vec::new();
        for (category, keywords) in CATEGORIES {
            let hits: Vec<&str> = keywords
                .iter()
                .filter(|k| words.iter().any(|w| w == *k))
                .copied()
                .collect();
            if hits.len() > best.1 {
                best = (category, hits.len());
                matched_keywords = hits;
            }
        }

        Ok(json!({
            "category": best.0,
            "keywords": matched_keywords,
        }))
    }

    async fn suggest_reply(&self, job: &Job) -> Result<Value> {
        let content = job.content.trim();
        let lower = content.to_lowercase();

        let suggestions: Vec<&str> = if content.ends_with('?') {
            vec![
                "Let me check and get back to you.",
                "Good question - I'll find out.",
                "Yes, that works for me.",
            ]
        } else if lower.contains("thank") {
            vec!["You're welcome!", "Happy to help.", "Any time."]
        } else if lower.contains("sorry") {
            vec!["No worries at all.", "It happens - all good.", "Thanks for letting me know."]
        } else {
            vec!["Got it, thanks!", "Sounds good.", "Noted - I'll follow up."]
        };

        Ok(json!({ "suggestions": suggestions }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, NewJob};

    fn job_with(content: &str, kind: JobKind) -> Job {
        Job::new(
            NewJob {
                kind,
                user_id: "u1".to_string(),
                message_id: "m1".to_string(),
                content: content.to_string(),
                conversation_context: None,
            },
            3,
        )
    }

    #[tokio::test]
    async fn test_sentiment_positive() {
        let analyzer = LexiconAnalyzer::new();
        let result = analyzer
            .sentiment(&job_with("I love this!", JobKind::Sentiment))
            .await
            .unwrap();
        assert_eq!(result["sentiment"], "positive");
    }

    #[tokio::test]
    async fn test_sentiment_negative() {
        let analyzer = LexiconAnalyzer::new();
        let result = analyzer
            .sentiment(&job_with("this is terrible and broken", JobKind::Sentiment))
            .await
            .unwrap();
        assert_eq!(result["sentiment"], "negative");
    }

    #[tokio::test]
    async fn test_categorize_matches_keywords() {
        let analyzer = LexiconAnalyzer::new();
        let result = analyzer
            .categorize(&job_with(
                "the invoice for last month's payment is attached",
                JobKind::Categorize,
            ))
            .await
            .unwrap();
        assert_eq!(result["category"], "finance");
    }

    #[tokio::test]
    async fn test_suggest_reply_for_question() {
        let analyzer = LexiconAnalyzer::new();
        let result = analyzer
            .suggest_reply(&job_with("are you free tomorrow?", JobKind::SuggestReply))
            .await
            .unwrap();
        let suggestions = result["suggestions"].as_array().unwrap();
        assert!(!suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_analysis_is_deterministic() {
        let analyzer = LexiconAnalyzer::new();
        let job = job_with("I love this!", JobKind::Sentiment);
        let a = analyzer.sentiment(&job).await.unwrap();
        let b = analyzer.sentiment(&job).await.unwrap();
        assert_eq!(a, b);
    }
}
