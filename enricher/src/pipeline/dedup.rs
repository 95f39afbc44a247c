use indexmap::IndexMap;

use super::types::{ChannelEntry, InputEntry};
use crate::channel::{normalize, ChannelId};

/// Placement name the ad platform reports for removed channels.
const REMOVED_PLACEMENT_NAME: &str = "unknown";

#[derive(Debug, Default)]
pub struct Deduped {
    pub channels: IndexMap<ChannelId, ChannelEntry>,
    pub invalid: u64,
    pub unknown_dropped: u64,
}

/// Normalize every placement, drop removed channels and unparseable rows,
/// and merge duplicates. First-seen order is kept; weights are summed.
pub fn dedup_entries(entries: impl IntoIterator<Item = InputEntry>) -> Deduped {
    let mut deduped = Deduped::default();

    for entry in entries {
        let name = entry
            .placement_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        if name.is_some_and(|n| n.eq_ignore_ascii_case(REMOVED_PLACEMENT_NAME)) {
            tracing::debug!("Skipping removed placement: {}", entry.placement);
            deduped.unknown_dropped += 1;
            continue;
        }

        let Some(channel) = normalize(&entry.placement) else {
            tracing::debug!("Not a channel placement: {}", entry.placement);
            deduped.invalid += 1;
            continue;
        };

        let merged = deduped.channels.entry(channel).or_default();
        merged.weight = merged.weight.saturating_add(entry.weight);
        if merged.placement_name.is_none() {
            merged.placement_name = name.map(str::to_string);
        }
    }

    deduped
}

/// Case-insensitive substring match of configured keywords against a
/// placement name.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    keywords: Vec<(String, String)>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(|k| (k.to_lowercase(), k.to_string()))
                .collect(),
        }
    }

    /// The first configured keyword contained in `name`.
    pub fn find(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.keywords
            .iter()
            .find(|(lowered, _)| name.contains(lowered.as_str()))
            .map(|(_, original)| original.as_str())
    }
}
