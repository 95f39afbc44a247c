use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReasoningError;

const CONFIDENCE_LEVELS: &[&str] = &["high", "medium", "low"];

/// Structured classification for one channel. The attribute map is kept
/// as returned; only the three required keys are checked and normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(Map<String, Value>);

impl Classification {
    pub fn from_attributes(attributes: Map<String, Value>) -> Self {
        Classification(attributes)
    }

    /// Parse and validate a raw completion.
    pub fn parse(content: &str) -> Result<Self, ReasoningError> {
        let value = match serde_json::from_str::<Value>(content.trim()) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!("Could not parse JSON response, extracting object manually...");
                static RE_OBJECT: Lazy<Regex> =
                    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex"));
                let object = RE_OBJECT.find(content).ok_or_else(|| {
                    ReasoningError::Malformed(format!("no JSON object in: {}", preview(content)))
                })?;
                serde_json::from_str(object.as_str())
                    .map_err(|e| ReasoningError::Malformed(e.to_string()))?
            }
        };

        match value {
            Value::Object(attributes) => Self::validate(attributes),
            other => Err(ReasoningError::Malformed(format!(
                "expected an object, got {}",
                preview(&other.to_string())
            ))),
        }
    }

    fn validate(mut attributes: Map<String, Value>) -> Result<Self, ReasoningError> {
        let is_children = match attributes.get("is_children_content") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
            Some(other) => {
                return Err(ReasoningError::Malformed(format!(
                    "is_children_content is not a boolean: {}",
                    other
                )))
            }
            None => {
                return Err(ReasoningError::Malformed(
                    "missing is_children_content".to_string(),
                ))
            }
        };
        attributes.insert("is_children_content".to_string(), Value::Bool(is_children));

        let confidence = attributes
            .get("confidence")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_lowercase())
            .filter(|c| CONFIDENCE_LEVELS.contains(&c.as_str()))
            .ok_or_else(|| {
                ReasoningError::Malformed("confidence must be high, medium or low".to_string())
            })?;
        attributes.insert("confidence".to_string(), Value::String(confidence));

        match attributes.get("reasoning").and_then(Value::as_str) {
            Some(reasoning) if !reasoning.trim().is_empty() => {}
            _ => return Err(ReasoningError::Malformed("missing reasoning".to_string())),
        }

        Ok(Classification(attributes))
    }

    /// Low-confidence placeholder stored when no valid classification could
    /// be obtained.
    pub fn degraded(reason: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert("is_children_content".to_string(), Value::Bool(false));
        attributes.insert("confidence".to_string(), Value::String("low".to_string()));
        attributes.insert(
            "reasoning".to_string(),
            Value::String(format!("Failed to analyze: {}", reason)),
        );
        Classification(attributes)
    }

    /// Classification implied by a keyword hit on the placement name.
    pub fn keyword_match(keyword: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert("is_children_content".to_string(), Value::Bool(true));
        attributes.insert("confidence".to_string(), Value::String("high".to_string()));
        attributes.insert(
            "reasoning".to_string(),
            Value::String(format!("Placement name contains keyword '{}'", keyword)),
        );
        Classification(attributes)
    }

    pub fn is_children_content(&self) -> Option<bool> {
        self.0.get("is_children_content").and_then(Value::as_bool)
    }

    pub fn confidence(&self) -> Option<&str> {
        self.0.get("confidence").and_then(Value::as_str)
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.0.get("reasoning").and_then(Value::as_str)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_attributes(self) -> Map<String, Value> {
        self.0
    }
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
