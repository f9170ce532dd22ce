//! The only place that indexes into the untyped feed payload.

use serde_json::Value;

use crate::domain::{HighlightGroup, MediaKind, MediaSegment, Profile};
use crate::error::ParseError;
use crate::feed::FeedPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub profile: Profile,
    pub stories: Vec<MediaSegment>,
    pub curated: Vec<HighlightGroup>,
    pub spotlight: Vec<HighlightGroup>,
    /// Raw containers, kept for sidecar dumps.
    pub raw_stories: Value,
    pub raw_curated: Value,
    pub raw_spotlight: Value,
}

pub fn parse(payload: &FeedPayload) -> Result<ParsedFeed, ParseError> {
    let page_props = payload
        .value
        .get("props")
        .and_then(|value| value.get("pageProps"))
        .ok_or_else(|| ParseError::Malformed("missing props.pageProps".to_string()))?;

    let profile = parse_profile(page_props)?;

    let raw_stories = page_props
        .get("story")
        .and_then(|value| value.get("snapList"))
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let stories = parse_segments(&raw_stories);

    let raw_curated = page_props
        .get("curatedHighlights")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let curated = parse_curated(&raw_curated);

    let raw_spotlight = page_props
        .get("spotlightHighlights")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let spotlight = parse_spotlight(&raw_spotlight);

    Ok(ParsedFeed {
        profile,
        stories,
        curated,
        spotlight,
        raw_stories,
        raw_curated,
        raw_spotlight,
    })
}

fn parse_profile(page_props: &Value) -> Result<Profile, ParseError> {
    let container = page_props
        .get("userProfile")
        .filter(|value| !value.is_null())
        .ok_or(ParseError::AccountNotFound)?;
    let case = container
        .get("$case")
        .and_then(|value| value.as_str())
        .ok_or_else(|| ParseError::Malformed("userProfile without $case".to_string()))?;
    let record = container
        .get(case)
        .ok_or_else(|| ParseError::Malformed(format!("userProfile.{case} missing")))?;

    let username = record
        .get("username")
        .and_then(|value| value.as_str())
        .ok_or_else(|| ParseError::Malformed("profile without username".to_string()))?
        .to_string();
    let display_name = record
        .get("displayName")
        .or_else(|| record.get("title"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());
    let hero_image_url = non_empty_str(record.get("squareHeroImageUrl"));
    let preview_image_url = non_empty_str(
        page_props
            .get("linkPreview")
            .and_then(|value| value.get("facebookImage"))
            .and_then(|value| value.get("url")),
    );

    Ok(Profile {
        username,
        display_name,
        hero_image_url,
        preview_image_url,
        raw: record.clone(),
    })
}

fn parse_curated(raw: &Value) -> Vec<HighlightGroup> {
    let mut blank_titles = 0usize;
    raw.as_array()
        .map(|groups| {
            groups
                .iter()
                .map(|group| {
                    let title = group
                        .get("storyTitle")
                        .and_then(|value| value.get("value"))
                        .and_then(|value| value.as_str())
                        .map(|value| value.trim().to_string())
                        .unwrap_or_default();
                    let title = if title.is_empty() {
                        blank_titles += 1;
                        format!("Highlight-{blank_titles}")
                    } else {
                        title
                    };
                    HighlightGroup {
                        title,
                        segments: group.get("snapList").map(parse_segments).unwrap_or_default(),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_spotlight(raw: &Value) -> Vec<HighlightGroup> {
    raw.as_array()
        .map(|groups| {
            groups
                .iter()
                .enumerate()
                .map(|(index, group)| HighlightGroup {
                    title: format!("Spotlight-{}", index + 1),
                    segments: group.get("snapList").map(parse_segments).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_segments(raw: &Value) -> Vec<MediaSegment> {
    raw.as_array()
        .map(|snaps| snaps.iter().filter_map(parse_segment).collect())
        .unwrap_or_default()
}

fn parse_segment(snap: &Value) -> Option<MediaSegment> {
    let url = snap
        .get("snapUrls")
        .and_then(|value| value.get("mediaUrl"))
        .and_then(|value| value.as_str())
        .unwrap_or_default();
    if url.is_empty() {
        return None;
    }

    let captured_at = snap
        .get("timestampInSec")
        .and_then(|value| value.get("value"))
        .and_then(as_epoch);
    let Some(captured_at) = captured_at else {
        tracing::debug!("skipping snap without timestamp: {url}");
        return None;
    };

    let kind = snap
        .get("snapMediaType")
        .and_then(|value| value.as_i64())
        .map(MediaKind::from_code)
        .unwrap_or(MediaKind::Image);
    let id = snap
        .get("snapId")
        .and_then(|value| value.get("value"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
        .unwrap_or_else(|| format!("{captured_at}"));

    Some(MediaSegment {
        id,
        url: url.to_string(),
        kind,
        captured_at,
        raw: snap.clone(),
    })
}

fn as_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}
