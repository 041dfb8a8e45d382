//! Contact directory for rule-based audiences

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::AudienceQuery;

/// Resolves a tag query into raw address tokens
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn resolve(&self, query: &AudienceQuery) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fixed contact list, matched by tag
#[derive(Debug, Clone, Default)]
pub struct StaticContactDirectory {
    contacts: Vec<Contact>,
}

impl StaticContactDirectory {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }

    fn matches(contact: &Contact, query: &AudienceQuery) -> bool {
        let has = |tag: &String| contact.tags.iter().any(|t| t.eq_ignore_ascii_case(tag));
        let included = query.tags.is_empty() || query.tags.iter().any(has);
        included && !query.exclude_tags.iter().any(has)
    }
}

#[async_trait]
impl ContactDirectory for StaticContactDirectory {
    async fn resolve(&self, query: &AudienceQuery) -> anyhow::Result<Vec<String>> {
        Ok(self
            .contacts
            .iter()
            .filter(|c| Self::matches(c, query))
            .map(|c| c.phone.clone())
            .collect())
    }
}
