//! Channel identifiers
//!
//! Placement reports spell the same channel many ways: with or without a
//! scheme, `m.` or `www.` hosts, trailing `/videos` segments, query strings,
//! mixed-case handles, surrounding text. Every spelling is collapsed into one
//! canonical URL before it is used as a cache key.

use std::fmt;

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const CANONICAL_BASE: &str = "https://www.youtube.com";

/// Top-level paths on youtube.com that are never channels.
const RESERVED_PATHS: &[&str] = &[
    "watch", "playlist", "shorts", "results", "feed", "embed", "live", "hashtag", "channel",
    "c", "user", "redirect", "premium", "account", "about", "t", "s", "gaming", "music",
];

// The host must not be glued to a longer name such as `notyoutube.com`
static YOUTUBE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:^|[^a-z0-9./-])((?:https?://)?(?:[a-z0-9-]+\.)?youtube\.com/[^\s,;()"'<>]+)"#,
    )
    .expect("youtube url regex")
});
static BARE_HANDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([\w.\-]{1,100})$").expect("handle regex"));
static BARE_CHANNEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("channel id regex"));
static ID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("id regex"));
static NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.\-]+$").expect("name regex"));

/// How a channel is addressed, borrowed out of a canonical [`ChannelId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind<'a> {
    /// `UC…` channel id, case-sensitive.
    Id(&'a str),
    /// `@handle`, stored lowercase without the `@`.
    Handle(&'a str),
    /// Legacy `/c/name` custom URL, stored lowercase.
    Custom(&'a str),
    /// Legacy `/user/name` username, stored lowercase.
    User(&'a str),
}

/// Canonical channel key. Only obtainable through [`normalize`] so every
/// instance is already in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChannelKind<'_> {
        let path = self
            .0
            .strip_prefix(CANONICAL_BASE)
            .and_then(|p| p.strip_prefix('/'))
            .unwrap_or(&self.0);

        if let Some(id) = path.strip_prefix("channel/") {
            ChannelKind::Id(id)
        } else if let Some(handle) = path.strip_prefix('@') {
            ChannelKind::Handle(handle)
        } else if let Some(name) = path.strip_prefix("user/") {
            ChannelKind::User(name)
        } else {
            ChannelKind::Custom(path.strip_prefix("c/").unwrap_or(path))
        }
    }

    /// Re-validate a key read back from storage.
    pub fn parse(key: &str) -> Option<Self> {
        normalize(key)
    }

    fn from_kind(kind: ChannelKind<'_>) -> Self {
        let key = match kind {
            ChannelKind::Id(id) => format!("{CANONICAL_BASE}/channel/{id}"),
            ChannelKind::Handle(handle) => format!("{CANONICAL_BASE}/@{handle}"),
            ChannelKind::Custom(name) => format!("{CANONICAL_BASE}/c/{name}"),
            ChannelKind::User(name) => format!("{CANONICAL_BASE}/user/{name}"),
        };
        ChannelId(key)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a channel reference: {raw}")))
    }
}

/// Normalize a placement string into a canonical channel key.
///
/// Returns `None` when the text holds no recognisable channel reference
/// (video links, playlists, unrelated URLs).
pub fn normalize(raw: &str) -> Option<ChannelId> {
    let text = raw.trim().trim_matches(|c: char| ",;()\"'".contains(c));
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = BARE_HANDLE.captures(text) {
        return lowercase_kind(&caps[1], |s| ChannelKind::Handle(s));
    }
    if BARE_CHANNEL_ID.is_match(text) {
        return Some(ChannelId::from_kind(ChannelKind::Id(text)));
    }

    let found = YOUTUBE_URL.captures(text)?.get(1)?.as_str();
    let with_scheme = if found.contains("://") {
        found.to_string()
    } else {
        format!("https://{found}")
    };
    let url = Url::parse(&with_scheme).ok()?;

    let host = url.host_str()?.to_ascii_lowercase();
    if host != "youtube.com" && !host.ends_with(".youtube.com") {
        return None;
    }

    // `Url` percent-encodes non-ASCII paths; keys hold the decoded text
    let decoded: Vec<String> = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect();
    let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

    match segments.as_slice() {
        ["channel", id, ..] if ID_CHARS.is_match(id) => {
            Some(ChannelId::from_kind(ChannelKind::Id(id)))
        }
        ["c", name, ..] => lowercase_kind(name, |s| ChannelKind::Custom(s)),
        ["user", name, ..] => lowercase_kind(name, |s| ChannelKind::User(s)),
        [first, ..] if first.starts_with('@') => {
            lowercase_kind(first.trim_start_matches('@'), |s| ChannelKind::Handle(s))
        }
        [name, ..] if !RESERVED_PATHS.contains(&name.to_ascii_lowercase().as_str()) => {
            // Bare vanity path, e.g. youtube.com/SomeChannel
            lowercase_kind(name, |s| ChannelKind::Custom(s))
        }
        _ => None,
    }
}

/// Names must survive a trip through `Url::parse` unchanged, so separators,
/// escapes and dot-only segments are refused.
fn lowercase_kind(value: &str, make: fn(&str) -> ChannelKind<'_>) -> Option<ChannelId> {
    let value = value.to_lowercase();
    if !NAME_CHARS.is_match(&value) || value.chars().all(|c| c == '.') {
        return None;
    }
    Some(ChannelId::from_kind(make(&value)))
}
