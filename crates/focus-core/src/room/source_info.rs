//! `SourceInfo` advertisement parsing.
//!
//! Members advertise their named sources and mute state as a JSON
//! object keyed by source name. Media type is explicit or derived from
//! the `-a<n>` / `-v<n>` name suffix.

use std::collections::HashMap;

use serde_json::Value;

use crate::source::{MediaType, VideoType};

use super::json::{opt_bool, opt_str, parse_ci_enum, JsonParseError, StrictObject};

/// One entry of a member's source-info advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    /// Absent on the wire means muted.
    pub muted: bool,
    pub video_type: Option<VideoType>,
    pub media_type: MediaType,
}

impl SourceInfo {
    pub fn is_sender_of(&self, media_type: MediaType) -> bool {
        !self.muted && self.media_type == media_type
    }
}

/// Parse the source-info JSON payload carried in presence.
pub fn parse_source_info(raw: &str) -> Result<HashMap<String, SourceInfo>, JsonParseError> {
    let object = StrictObject::parse(raw)?;
    let mut infos = HashMap::with_capacity(object.0.len());

    for (name, value) in object.iter() {
        let entry = match value {
            Value::Object(_) => StrictObject::from_value(name, value)?,
            _ => {
                return Err(JsonParseError::InvalidValue {
                    field: name.to_string(),
                    reason: "expected object".to_string(),
                })
            }
        };

        let muted = opt_bool(&entry, "muted")?.unwrap_or(true);
        let video_type = match opt_str(&entry, "videoType")? {
            Some(raw) => Some(parse_ci_enum::<VideoType>("videoType", &raw)?),
            None => None,
        };
        let media_type = match opt_str(&entry, "mediaType")? {
            Some(raw) => parse_ci_enum::<MediaType>("mediaType", &raw)?,
            None => media_type_from_name(name).ok_or_else(|| JsonParseError::InvalidValue {
                field: name.to_string(),
                reason: "mediaType absent and name carries no -a<n>/-v<n> suffix".to_string(),
            })?,
        };

        infos.insert(
            name.to_string(),
            SourceInfo { name: name.to_string(), muted, video_type, media_type },
        );
    }
    Ok(infos)
}

/// Derive the media type from a `-a<n>` / `-v<n>` source-name suffix.
fn media_type_from_name(name: &str) -> Option<MediaType> {
    let suffix = name.rsplit('-').next()?;
    let mut chars = suffix.chars();
    let tag = chars.next()?;
    if chars.as_str().is_empty() || !chars.as_str().chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match tag {
        'a' => Some(MediaType::Audio),
        'v' => Some(MediaType::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_explicit_fields() {
        let infos = parse_source_info(
            r#"{"alice-v0": {"muted": false, "videoType": "camera", "mediaType": "video"}}"#,
        )
        .unwrap();
        let info = &infos["alice-v0"];
        assert_eq!(info.muted, false);
        assert_eq!(info.video_type, Some(VideoType::Camera));
        assert_eq!(info.media_type, MediaType::Video);
        assert!(info.is_sender_of(MediaType::Video));
    }

    #[test]
    fn test_muted_defaults_to_true() {
        let infos = parse_source_info(r#"{"alice-a0": {}}"#).unwrap();
        assert!(infos["alice-a0"].muted);
        assert_eq!(infos["alice-a0"].media_type, MediaType::Audio);
    }

    #[test]
    fn test_media_type_derived_from_suffix() {
        let infos = parse_source_info(r#"{"bob-a17": {"muted": false}}"#).unwrap();
        assert_eq!(infos["bob-a17"].media_type, MediaType::Audio);

        let infos = parse_source_info(r#"{"bob-v2": {}}"#).unwrap();
        assert_eq!(infos["bob-v2"].media_type, MediaType::Video);
    }

    #[test]
    fn test_video_type_case_insensitive() {
        let infos =
            parse_source_info(r#"{"c-v0": {"videoType": "DESKTOP"}}"#).unwrap();
        assert_eq!(infos["c-v0"].video_type, Some(VideoType::Desktop));
    }

    #[test]
    fn test_underivable_media_type_rejected() {
        let err = parse_source_info(r#"{"nosuffix": {}}"#).unwrap_err();
        assert!(matches!(err, JsonParseError::InvalidValue { .. }));
    }

    #[test]
    fn test_duplicate_source_name_rejected() {
        let err =
            parse_source_info(r#"{"a-v0": {}, "a-v0": {"muted": false}}"#).unwrap_err();
        assert_eq!(err, JsonParseError::DuplicateKey("a-v0".into()));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let infos =
            parse_source_info(r#"{"a-v0": {"muted": false, "futureField": 3}}"#).unwrap();
        assert_eq!(infos["a-v0"].muted, false);
    }
}
