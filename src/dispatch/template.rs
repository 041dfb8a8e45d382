//! Message rendering with Handlebars
//!
//! Bodies may reference `{{phone}}`, `{{campaign}}` and `{{position}}`
//! (1-based). With weighted variants, each recipient's variant is drawn from a
//! ChaCha8 stream seeded by the campaign seed and the recipient position, so a
//! resumed or recovered campaign picks the same variant again.

use handlebars::{Handlebars, Template};
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Campaign, MessageContent, RecipientAddress};
use crate::transport::ResolvedMessage;

/// Template data for rendering
#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    phone: &'a str,
    campaign: &'a str,
    position: usize,
}

pub struct MessageRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Plain-text messages: no HTML escaping
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Reject empty bodies, unparsable templates and unusable weights
    pub fn validate(content: &MessageContent) -> Result<()> {
        match content {
            MessageContent::Single(body) => check_body("message", body),
            MessageContent::Weighted(variants) => {
                if variants.is_empty() {
                    return Err(Error::validation("At least one template variant is required"));
                }
                if variants.iter().all(|v| v.weight == 0) {
                    return Err(Error::validation("Template weights must not all be zero"));
                }
                variants
                    .iter()
                    .try_for_each(|v| check_body(&v.name, &v.body))
            }
        }
    }

    /// Variant name and body for the recipient at `position`
    pub fn select(
        content: &MessageContent,
        seed: u64,
        position: usize,
    ) -> Result<(Option<&str>, &str)> {
        match content {
            MessageContent::Single(body) => Ok((None, body.as_str())),
            MessageContent::Weighted(variants) => {
                let index = WeightedIndex::new(variants.iter().map(|v| v.weight))
                    .map_err(|e| Error::with_source("Invalid template weights", e))?;
                let mut rng = ChaCha8Rng::seed_from_u64(seed ^ position as u64);
                let chosen = &variants[index.sample(&mut rng)];
                Ok((Some(chosen.name.as_str()), chosen.body.as_str()))
            }
        }
    }

    /// Render the message for the recipient at `position`
    pub fn render(&self, campaign: &Campaign, position: usize) -> Result<ResolvedMessage> {
        let recipient: &RecipientAddress = campaign
            .recipients
            .get(position)
            .ok_or_else(|| Error::other(format!("No recipient at position {position}")))?;

        let (template, source) = Self::select(&campaign.content, campaign.template_seed, position)?;
        let data = TemplateData {
            phone: recipient.as_str(),
            campaign: &campaign.name,
            position: position + 1,
        };

        let body = self
            .handlebars
            .render_template(source, &data)
            .map_err(|e| Error::with_source("Failed to render message template", e))?;

        Ok(ResolvedMessage {
            template: template.map(str::to_string),
            body,
            attachments: campaign.attachments.clone(),
        })
    }
}

fn check_body(name: &str, body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(Error::validation(format!("Template '{name}' is empty")));
    }
    Template::compile(body)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("Template '{name}' is invalid: {e}")))
}
