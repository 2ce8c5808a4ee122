use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const REDDIT_WEB_BASE: &str = "https://reddit.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    pub content: Option<String>,
    pub subreddit: String,
    pub author: String,
    pub url: String,
    pub permalink: String,
    pub created_utc: i64,
    pub score: i32,
    pub num_comments: u32,
}

impl RedditPost {
    /// Lowercased title and body, the text every heuristic runs against.
    pub fn searchable_text(&self) -> String {
        let mut text = self.title.to_lowercase();
        if let Some(content) = &self.content {
            text.push(' ');
            text.push_str(&content.to_lowercase());
        }
        text
    }

    pub fn link(&self) -> String {
        if self.permalink.is_empty() {
            self.url.clone()
        } else {
            format!("{}{}", REDDIT_WEB_BASE, self.permalink)
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_utc, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeLevel {
    Elementary,
    Middle,
    High,
    Unknown,
}

impl GradeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeLevel::Elementary => "elementary",
            GradeLevel::Middle => "middle",
            GradeLevel::High => "high",
            GradeLevel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GradeLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elementary" => Ok(GradeLevel::Elementary),
            "middle" => Ok(GradeLevel::Middle),
            "high" => Ok(GradeLevel::High),
            "unknown" => Ok(GradeLevel::Unknown),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown grade level '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Algebra,
    Calculus,
    Geometry,
    Trigonometry,
    Statistics,
    Arithmetic,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Algebra,
        Topic::Calculus,
        Topic::Geometry,
        Topic::Trigonometry,
        Topic::Statistics,
        Topic::Arithmetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Algebra => "algebra",
            Topic::Calculus => "calculus",
            Topic::Geometry => "geometry",
            Topic::Trigonometry => "trigonometry",
            Topic::Statistics => "statistics",
            Topic::Arithmetic => "arithmetic",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput {
                message: format!("unknown topic '{}'", s),
            })
    }
}

/// Where a surfaced lead stands in the operator's manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Replied,
    Ignored,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Replied => "replied",
            LeadStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "replied" => Ok(LeadStatus::Replied),
            "ignored" => Ok(LeadStatus::Ignored),
            other => Err(CoreError::InvalidInput {
                message: format!(
                    "unknown lead status '{}' (expected new, contacted, replied or ignored)",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub post: RedditPost,
    pub grade_level: GradeLevel,
    pub topics: Vec<Topic>,
    pub is_urgent: bool,
    pub is_parent: bool,
    pub mentions_payment: bool,
    pub matched_keywords: Vec<String>,
    pub priority_score: u8,
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub surfaced_at: DateTime<Utc>,
}

impl Lead {
    pub fn topics_label(&self) -> String {
        if self.topics.is_empty() {
            "general mathematics".to_string()
        } else {
            self.topics
                .iter()
                .map(Topic::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority_score >= 8
    }
}

/// Dedup record: one row per post id ever observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenPost {
    pub post_id: String,
    pub subreddit: String,
    pub seen_at: DateTime<Utc>,
    pub surfaced: bool,
}

impl SeenPost {
    pub fn new(post: &RedditPost, seen_at: DateTime<Utc>, surfaced: bool) -> Self {
        Self {
            post_id: post.id.clone(),
            subreddit: post.subreddit.clone(),
            seen_at,
            surfaced,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadSummary {
    pub total_leads: u64,
    pub average_priority: f64,
    pub high_priority: u64,
    pub urgent: u64,
    pub parent: u64,
    pub seen_posts: u64,
}
