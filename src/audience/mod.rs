//! Recipient normalization and deduplication
//!
//! Turns pasted operator input into canonical `+<country><number>` addresses:
//!
//! 1. strip every non-digit character
//! 2. replace a leading trunk prefix (`0`) with the country code
//! 3. prepend the country code when it is still missing
//! 4. prefix with `+` and check the digit count
//!
//! Tokens that fail are reported back verbatim so the operator can fix them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::AudienceConfig;
use crate::models::RecipientAddress;

/// Result of normalizing an audience
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audience {
    /// Canonical, unique addresses in first-occurrence order
    pub valid: Vec<RecipientAddress>,

    /// Original tokens that could not be normalized
    pub invalid: Vec<String>,
}

impl Audience {
    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }
}

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[\s,]+").expect("Invalid regex pattern"))
}

/// Pure normalizer for one numbering scheme
#[derive(Debug, Clone)]
pub struct AudienceNormalizer {
    country_code: String,
    trunk_prefix: String,
    min_digits: usize,
    max_digits: usize,
}

impl Default for AudienceNormalizer {
    fn default() -> Self {
        Self::new(&AudienceConfig::default())
    }
}

impl AudienceNormalizer {
    pub fn new(config: &AudienceConfig) -> Self {
        Self {
            country_code: config.country_code.clone(),
            trunk_prefix: config.trunk_prefix.clone(),
            min_digits: config.min_digits,
            max_digits: config.max_digits,
        }
    }

    /// Split a pasted block on newlines, commas and whitespace
    pub fn tokenize(raw: &str) -> impl Iterator<Item = &str> {
        separators().split(raw).filter(|t| !t.is_empty())
    }

    /// Normalize one token, `None` if it cannot become a canonical address
    pub fn normalize_one(&self, token: &str) -> Option<RecipientAddress> {
        let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }

        let national = match digits.strip_prefix(self.trunk_prefix.as_str()) {
            Some(rest) if !self.trunk_prefix.is_empty() => format!("{}{rest}", self.country_code),
            _ => digits,
        };

        let full = if national.starts_with(&self.country_code) {
            national
        } else {
            format!("{}{national}", self.country_code)
        };

        if full.len() < self.min_digits || full.len() > self.max_digits {
            return None;
        }

        RecipientAddress::parse(format!("+{full}"))
    }

    /// Normalize a pasted text block
    pub fn normalize_text(&self, raw: &str) -> Audience {
        self.normalize_tokens(Self::tokenize(raw))
    }

    /// Normalize a list of tokens; each entry may itself contain separators
    pub fn normalize_list<S: AsRef<str>>(&self, tokens: &[S]) -> Audience {
        self.normalize_tokens(tokens.iter().flat_map(|t| Self::tokenize(t.as_ref())))
    }

    fn normalize_tokens<'a>(&self, tokens: impl Iterator<Item = &'a str>) -> Audience {
        let mut seen = HashSet::new();
        let mut seen_invalid = HashSet::new();
        let mut audience = Audience::default();

        for token in tokens {
            match self.normalize_one(token) {
                Some(addr) => {
                    if seen.insert(addr.clone()) {
                        audience.valid.push(addr);
                    }
                }
                None => {
                    if seen_invalid.insert(token) {
                        audience.invalid.push(token.to_string());
                    }
                }
            }
        }

        tracing::debug!(
            valid = audience.valid.len(),
            invalid = audience.invalid.len(),
            "Audience normalized"
        );
        audience
    }
}
