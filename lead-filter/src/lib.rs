pub mod matcher;
pub mod scoring;

pub use matcher::{KeywordMatcher, PhraseSet};
pub use scoring::score_lead;

use chrono::{DateTime, Duration, Utc};
use leadwatch_core::{CoreError, FilterConfig, GradeKeywords, GradeLevel, Lead, LeadStatus, RedditPost, Topic};
use tracing::debug;

fn topic_keywords(topic: Topic) -> &'static [&'static str] {
    match topic {
        Topic::Algebra => &["algebra", "equation", "variable", "expression", "quadratic"],
        Topic::Calculus => &["calculus", "derivative", "integral", "limit", "differentiation"],
        Topic::Geometry => &["geometry", "triangle", "circle", "angle", "polygon"],
        Topic::Trigonometry => &["trigonometry", "sine", "cosine", "trig", "tan"],
        Topic::Statistics => &["statistics", "probability", "mean", "median", "data"],
        Topic::Arithmetic => &[
            "addition",
            "subtraction",
            "multiplication",
            "division",
            "fractions",
            "decimals",
        ],
    }
}

/// Grade bands, checked youngest to oldest.
#[derive(Debug, Clone)]
pub struct GradeDetector {
    bands: Vec<(GradeLevel, PhraseSet)>,
}

impl GradeDetector {
    pub fn new(grades: &GradeKeywords) -> Result<Self, CoreError> {
        Ok(Self {
            bands: vec![
                (
                    GradeLevel::Elementary,
                    PhraseSet::new("filter.grade_keywords.elementary", &grades.elementary)?,
                ),
                (
                    GradeLevel::Middle,
                    PhraseSet::new("filter.grade_keywords.middle", &grades.middle)?,
                ),
                (
                    GradeLevel::High,
                    PhraseSet::new("filter.grade_keywords.high", &grades.high)?,
                ),
            ],
        })
    }

    /// First grade band whose keywords appear.
    pub fn detect(&self, text: &str) -> GradeLevel {
        self.bands
            .iter()
            .find(|(_, keywords)| keywords.is_match(text))
            .map_or(GradeLevel::Unknown, |(level, _)| *level)
    }
}

#[derive(Debug, Clone)]
pub struct TopicExtractor {
    topics: Vec<(Topic, PhraseSet)>,
}

impl TopicExtractor {
    pub fn new() -> Result<Self, CoreError> {
        let topics = Topic::ALL
            .into_iter()
            .map(|topic| PhraseSet::new("topics", topic_keywords(topic)).map(|set| (topic, set)))
            .collect::<Result<_, CoreError>>()?;
        Ok(Self { topics })
    }

    pub fn extract(&self, text: &str) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|(_, keywords)| keywords.is_match(text))
            .map(|(topic, _)| *topic)
            .collect()
    }
}

/// Turns raw posts into scored leads, or rejects them.
#[derive(Debug, Clone)]
pub struct LeadFilter {
    matcher: KeywordMatcher,
    grades: GradeDetector,
    topics: TopicExtractor,
    urgency: PhraseSet,
    parent: PhraseSet,
    payment: PhraseSet,
    config: FilterConfig,
}

impl LeadFilter {
    /// Compiles every keyword list once. Fails only when a list is too large
    /// to compile.
    pub fn new(config: FilterConfig) -> Result<Self, CoreError> {
        Ok(Self {
            matcher: KeywordMatcher::new(&config.keywords)?,
            grades: GradeDetector::new(&config.grade_keywords)?,
            topics: TopicExtractor::new()?,
            urgency: PhraseSet::new("filter.urgency_keywords", &config.urgency_keywords)?,
            parent: PhraseSet::new("filter.parent_keywords", &config.parent_keywords)?,
            payment: PhraseSet::new("filter.payment_keywords", &config.payment_keywords)?,
            config,
        })
    }

    pub fn max_age(&self) -> Duration {
        Duration::hours(self.config.max_age_hours as i64)
    }

    /// Returns a lead when the post is recent enough and matches at least one
    /// search keyword.
    pub fn evaluate(&self, post: &RedditPost, now: DateTime<Utc>) -> Option<Lead> {
        let cutoff = now - self.max_age();
        match post.created_at() {
            Some(created) if created >= cutoff => {}
            _ => {
                debug!("Skipping {} in r/{}: older than cutoff", post.id, post.subreddit);
                return None;
            }
        }

        let text = post.searchable_text();
        let matched_keywords = self.matcher.matches(&text);
        if matched_keywords.is_empty() {
            return None;
        }

        let mut lead = Lead {
            post: post.clone(),
            grade_level: self.grades.detect(&text),
            topics: self.topics.extract(&text),
            is_urgent: self.urgency.is_match(&text),
            is_parent: self.parent.is_match(&text),
            mentions_payment: self.payment.is_match(&text),
            matched_keywords,
            priority_score: 0,
            status: LeadStatus::New,
            notes: None,
            surfaced_at: now,
        };
        lead.priority_score = score_lead(&lead);

        debug!(
            "Post {} matched {:?} (priority {})",
            post.id, lead.matched_keywords, lead.priority_score
        );
        Some(lead)
    }
}
