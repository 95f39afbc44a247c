use anyhow::Context;
use indoc::indoc;
use minijinja::{context, Environment};

use super::PromptRequest;
use crate::{enricher_config::PromptConfig, youtube::FetchedMetadata};

const DESCRIPTION_LIMIT: usize = 500;
const RECENT_TITLE_LIMIT: usize = 5;

pub const DEFAULT_SYSTEM_PROMPT: &str = indoc! {r#"
    You are an expert in YouTube content analysis for advertising brand safety.
    You decide whether a channel is directed at children and describe the channel for media buyers.
    You will only respond with a JSON object with the keys:
    is_children_content (boolean), confidence ("high", "medium" or "low"), reasoning (string),
    content_vertical, content_niche, content_format, brand_safety_score ("high", "medium" or "low"),
    premium_suitable (boolean), geographic_focus, primary_language, purchase_intent, summary."#};

pub const DEFAULT_USER_TEMPLATE: &str = indoc! {r#"
    Analyze the following YouTube channel.
    Channel name: {{ channel_name }}
    Description: {{ description }}
    Country: {{ country }}
    Keywords: {{ keywords }}
    Subscribers: {{ subscriber_count }}
    Videos: {{ video_count }}
    Recent video titles: {{ recent_titles | join(", ") }}"#};

/// Renders the classification prompt for a channel.
pub struct PromptBuilder {
    system: String,
    user_template: String,
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new(system: String, user_template: String) -> anyhow::Result<Self> {
        let env = Environment::new();
        env.template_from_str(&user_template)
            .context("Invalid user prompt template")?;
        Ok(Self {
            system,
            user_template,
            env,
        })
    }

    pub fn from_config(config: &PromptConfig) -> anyhow::Result<Self> {
        let system = if config.system.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            config.system.clone()
        };
        let user_template = if config.user_template.trim().is_empty() {
            DEFAULT_USER_TEMPLATE.to_string()
        } else {
            config.user_template.clone()
        };
        Self::new(system, user_template)
    }

    pub fn build(&self, metadata: &FetchedMetadata) -> anyhow::Result<PromptRequest> {
        let description: String = metadata
            .description
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(DESCRIPTION_LIMIT)
            .collect();
        let recent_titles: Vec<&str> = metadata
            .recent_videos
            .iter()
            .filter_map(|v| v.title.as_deref())
            .take(RECENT_TITLE_LIMIT)
            .collect();

        let user = self
            .env
            .render_str(
                &self.user_template,
                context! {
                    channel_name => metadata.display_name(),
                    channel_url => metadata.channel.as_str(),
                    description => description,
                    custom_url => metadata.custom_url.as_deref().unwrap_or_default(),
                    country => metadata.country.as_deref().unwrap_or("Unknown"),
                    keywords => metadata.keywords.as_deref().unwrap_or_default(),
                    published_at => metadata.published_at.as_deref().unwrap_or_default(),
                    subscriber_count => metadata.subscriber_count,
                    video_count => metadata.video_count,
                    view_count => metadata.view_count,
                    recent_titles => recent_titles,
                },
            )
            .context("Could not render user prompt")?;

        Ok(PromptRequest {
            system: self.system.clone(),
            user,
        })
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_template: DEFAULT_USER_TEMPLATE.to_string(),
            env: Environment::new(),
        }
    }
}
