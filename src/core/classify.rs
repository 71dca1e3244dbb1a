//! Keyword classifiers over free text
//!
//! Tables map a tag to the patterns that imply it. Classification is a pure
//! function of the text and the table passed in; nothing here touches the store.

use crate::core::service::ServiceError;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Tag assigned by the sponsorship table
pub const SPONSORSHIP_TAG: &str = "visa_sponsorship";

const SPONSORSHIP_PATTERNS: &[(&str, &[&str])] = &[(
    SPONSORSHIP_TAG,
    &[
        r"visa\s(sponsorship|support)",
        r"sponsorship\s(available|provided)",
        r"work\spermit",
        r"relocation\s(assistance|package|support)",
    ],
)];

const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "fintech",
        &["fintech", "financial services", "banking", "investment", "insurance"],
    ),
    (
        "healthtech",
        &["healthtech", "medical", "pharma", "biotech", "healthcare"],
    ),
    ("e-commerce", &["e-commerce", "ecommerce", "retail", "shopping"]),
    ("saas", &["saas", "software as a service"]),
    ("ai", &["artificial intelligence", "machine learning", "ai", "ml"]),
];

const CULTURE_KEYWORDS: &[(&str, &[&str])] = &[
    ("fast-paced", &["fast-paced", "dynamic environment"]),
    (
        "work-life balance",
        &["work-life balance", "flexible hours", "hybrid work"],
    ),
    (
        "learning",
        &["continuous learning", "professional development", "growth opportunity"],
    ),
    ("collaborative", &["collaborative", "team-oriented", "team player"]),
    ("innovative", &["innovative", "cutting-edge", "state-of-the-art"]),
];

/// Skills recognised by [`extract_skills`] unless a custom list is configured
pub const DEFAULT_SKILLS: &[&str] = &[
    "python", "javascript", "typescript", "java", "react", "vue", "angular", "node.js", "go",
    "rust", "c#", "c++", "aws", "azure", "gcp", "docker", "kubernetes", "sql", "ruby", "php",
    "swift", "kotlin", "scala",
];

/// Tag to compiled patterns
#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    tags: BTreeMap<String, Vec<Regex>>,
}

impl KeywordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal phrase, matched case-insensitively on word boundaries
    pub fn add_keyword(&mut self, tag: &str, phrase: &str) -> Result<(), ServiceError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Empty keyword for tag '{}'",
                tag
            )));
        }
        let pattern = format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(phrase));
        self.insert(tag, &pattern)
    }

    /// Add a regular expression, matched case-insensitively
    pub fn add_pattern(&mut self, tag: &str, pattern: &str) -> Result<(), ServiceError> {
        self.insert(tag, &format!("(?i){}", pattern))
    }

    fn insert(&mut self, tag: &str, pattern: &str) -> Result<(), ServiceError> {
        let regex = Regex::new(pattern).map_err(|e| {
            ServiceError::Validation(format!("Invalid pattern for tag '{}': {}", tag, e))
        })?;
        self.tags.entry(tag.to_string()).or_default().push(regex);
        Ok(())
    }

    /// Build a table of literal phrases
    pub fn from_keywords<'a, I, P>(entries: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (&'a str, P)>,
        P: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for (tag, phrases) in entries {
            for phrase in phrases {
                table.add_keyword(tag, phrase)?;
            }
        }
        Ok(table)
    }

    /// Build a table of regular expressions
    pub fn from_patterns<'a, I, P>(entries: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (&'a str, P)>,
        P: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        for (tag, patterns) in entries {
            for pattern in patterns {
                table.add_pattern(tag, pattern)?;
            }
        }
        Ok(table)
    }

    fn builtin(entries: &[(&str, &[&str])], literal: bool) -> Self {
        let mut table = Self::new();
        for (tag, patterns) in entries {
            for pattern in patterns.iter() {
                let added = if literal {
                    table.add_keyword(tag, pattern)
                } else {
                    table.add_pattern(tag, pattern)
                };
                if let Err(e) = added {
                    warn!("Skipping built-in pattern '{}': {}", pattern, e);
                }
            }
        }
        table
    }

    /// Visa sponsorship and relocation phrases
    pub fn sponsorship() -> Self {
        Self::builtin(SPONSORSHIP_PATTERNS, false)
    }

    /// Industry tags (fintech, healthtech, e-commerce, saas, ai)
    pub fn industry() -> Self {
        Self::builtin(INDUSTRY_KEYWORDS, true)
    }

    /// Culture tags (fast-paced, work-life balance, learning, ...)
    pub fn culture() -> Self {
        Self::builtin(CULTURE_KEYWORDS, true)
    }

    /// Merge another table's patterns into this one
    pub fn extend(&mut self, other: KeywordTable) {
        for (tag, patterns) in other.tags {
            self.tags.entry(tag).or_default().extend(patterns);
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Tags whose patterns occur in the text
pub fn classify(text: &str, table: &KeywordTable) -> BTreeSet<String> {
    if text.trim().is_empty() {
        return BTreeSet::new();
    }
    table
        .tags
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|p| p.is_match(text)))
        .map(|(tag, _)| tag.clone())
        .collect()
}

/// Whether any pattern of the table occurs in the text
pub fn matches_any(text: &str, table: &KeywordTable) -> bool {
    !classify(text, table).is_empty()
}

/// Skills mentioned in the text
///
/// A skill only counts when it stands alone: "go" matches in "go programmer"
/// but not in "go-getter", and "javascript" does not yield "java".
pub fn extract_skills<S: AsRef<str>>(text: &str, skills: &[S]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    if text.trim().is_empty() {
        return found;
    }

    for skill in skills {
        let skill = skill.as_ref().trim();
        if skill.is_empty() {
            continue;
        }
        let pattern = format!(
            r"(?i)(?:^|[^\w\-.#+]){}(?:$|[^\w\-#+])",
            regex::escape(skill)
        );
        match Regex::new(&pattern) {
            Ok(regex) if regex.is_match(text) => {
                found.insert(skill.to_lowercase());
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping skill '{}': {}", skill, e),
        }
    }
    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sponsorship_table() {
        let table = KeywordTable::sponsorship();
        assert!(matches_any("We offer Visa Sponsorship for the right candidate", &table));
        assert!(matches_any("Relocation package included.", &table));
        assert!(matches_any("A valid work permit is required", &table));
        assert!(!matches_any("Great team, free coffee", &table));
        assert_eq!(
            classify("sponsorship available", &table),
            BTreeSet::from([SPONSORSHIP_TAG.to_string()])
        );
    }

    #[test]
    fn test_industry_and_culture_tags() {
        let mut table = KeywordTable::industry();
        table.extend(KeywordTable::culture());

        let tags = classify(
            "A fast-paced fintech startup applying machine learning to banking. Hybrid work.",
            &table,
        );
        assert_eq!(
            tags,
            BTreeSet::from([
                "ai".to_string(),
                "fast-paced".to_string(),
                "fintech".to_string(),
                "work-life balance".to_string(),
            ])
        );
    }

    #[test]
    fn test_keywords_respect_word_boundaries() {
        let table = KeywordTable::industry();
        assert!(classify("We maintain retail software", &table).contains("e-commerce"));
        assert!(!classify("We maintain legacy systems", &table).contains("ai"));
        assert!(classify("", &table).is_empty());
    }

    #[test]
    fn test_custom_tables() {
        let table = KeywordTable::from_keywords([("crypto", ["blockchain", "web3"])]).unwrap();
        assert!(classify("Building Web3 tooling", &table).contains("crypto"));

        let table = KeywordTable::from_patterns([("remote", [r"remote\s(first|friendly)"])]).unwrap();
        assert!(classify("Remote-first? No, remote friendly", &table).contains("remote"));

        assert!(KeywordTable::from_patterns([("bad", ["(unclosed"])]).is_err());
        assert!(KeywordTable::from_keywords([("blank", ["  "])]).is_err());
    }

    #[test]
    fn test_extract_skills() {
        let bio = "Senior developer with Python, React and Node.js experience. \
                   Deployed on AWS with Docker. Some C# too.";
        assert_eq!(
            extract_skills(bio, DEFAULT_SKILLS),
            BTreeSet::from([
                "aws".to_string(),
                "c#".to_string(),
                "docker".to_string(),
                "node.js".to_string(),
                "python".to_string(),
                "react".to_string(),
            ])
        );
    }

    #[test]
    fn test_extract_skills_boundaries() {
        assert!(extract_skills("I am a go-getter", DEFAULT_SKILLS).is_empty());
        assert_eq!(
            extract_skills("Looking for a Go programmer", DEFAULT_SKILLS),
            BTreeSet::from(["go".to_string()])
        );
        assert_eq!(
            extract_skills("Strong JavaScript skills", DEFAULT_SKILLS),
            BTreeSet::from(["javascript".to_string()])
        );
        assert!(extract_skills("", DEFAULT_SKILLS).is_empty());
    }
}
