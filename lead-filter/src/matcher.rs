use leadwatch_core::{ConfigError, CoreError};
use regex::RegexSet;

/// Word-boundary pattern for one lowercase phrase.
///
/// A phrase that ends in a digit must also end at a boundary, so "year 1"
/// does not match "year 10" while "tutor" still matches "tutoring".
fn phrase_pattern(phrase: &str) -> String {
    let mut pattern = String::new();
    if phrase.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(phrase));
    if phrase.ends_with(|c: char| c.is_ascii_digit()) {
        pattern.push_str(r"\b");
    }
    pattern
}

/// A list of phrases compiled once into a single `RegexSet`.
///
/// Phrases are trimmed and lowercased; text passed to the matching methods is
/// expected lowercase as well.
#[derive(Debug, Clone)]
pub struct PhraseSet {
    phrases: Vec<String>,
    set: RegexSet,
}

impl PhraseSet {
    pub fn new<I, S>(field: &str, phrases: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let set = RegexSet::new(phrases.iter().map(|p| phrase_pattern(p))).map_err(|e| {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: e.to_string(),
            }
        })?;

        Ok(Self { phrases, set })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Phrases found in `text`, in the order they were given.
    pub fn matches(&self, text: &str) -> Vec<String> {
        self.set
            .matches(text)
            .into_iter()
            .map(|index| self.phrases[index].clone())
            .collect()
    }
}

/// Matches post text against the configured search keywords.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: PhraseSet,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Result<Self, CoreError> {
        Ok(Self {
            keywords: PhraseSet::new("filter.keywords", keywords)?,
        })
    }

    /// Keywords found in `text`, in configuration order.
    pub fn matches(&self, text: &str) -> Vec<String> {
        self.keywords.matches(text)
    }
}
