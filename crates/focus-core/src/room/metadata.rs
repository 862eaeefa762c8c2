//! Room-metadata message parsing.
//!
//! A typed JSON message published by the room-metadata service after
//! join. Unknown properties are ignored, duplicate keys are rejected,
//! enum-like values are matched case-insensitively.

use super::json::{
    opt_bool, opt_str_list, opt_u64, JsonParseError, StrictObject,
};

/// Start-muted policy conveyed to joining participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartMutedPolicy {
    pub audio: bool,
    pub video: bool,
}

/// The room-metadata document, as far as the focus cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomMetadata {
    /// `visitors.live`: whether the visitor fanout is live.
    pub visitors_live: Option<bool>,
    pub start_muted: Option<StartMutedPolicy>,
    pub moderators: Vec<String>,
    pub participants: Vec<String>,
    pub transcribing_enabled: Option<bool>,
    pub async_transcription: Option<bool>,
    pub participants_soft_limit: Option<u32>,
    pub visitors_enabled: Option<bool>,
}

impl RoomMetadata {
    /// Parse the raw message body.
    pub fn parse(raw: &str) -> Result<Self, JsonParseError> {
        let object = StrictObject::parse(raw)?;
        let mut metadata = RoomMetadata::default();

        if let Some(value) = object.get("visitors") {
            let visitors = StrictObject::from_value("visitors", value)?;
            metadata.visitors_live = opt_bool(&visitors, "live")?;
        }

        if let Some(value) = object.get("startMuted") {
            let muted = StrictObject::from_value("startMuted", value)?;
            metadata.start_muted = Some(StartMutedPolicy {
                audio: opt_bool(&muted, "audio")?.unwrap_or(false),
                video: opt_bool(&muted, "video")?.unwrap_or(false),
            });
        }

        metadata.moderators = opt_str_list(&object, "moderators")?.unwrap_or_default();
        metadata.participants = opt_str_list(&object, "participants")?.unwrap_or_default();

        if let Some(value) = object.get("recording") {
            let recording = StrictObject::from_value("recording", value)?;
            metadata.transcribing_enabled = opt_bool(&recording, "isTranscribingEnabled")?;
        }

        metadata.async_transcription = opt_bool(&object, "asyncTranscription")?;
        metadata.participants_soft_limit =
            opt_u64(&object, "participantsSoftLimit")?.map(|v| v.min(u32::MAX as u64) as u32);
        metadata.visitors_enabled = opt_bool(&object, "visitorsEnabled")?;

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_document() {
        let metadata = RoomMetadata::parse(
            r#"{
                "visitors": {"live": true},
                "startMuted": {"audio": true},
                "moderators": ["m1", "m2"],
                "participants": ["p1"],
                "recording": {"isTranscribingEnabled": true},
                "asyncTranscription": false,
                "participantsSoftLimit": 100,
                "visitorsEnabled": true
            }"#,
        )
        .unwrap();

        assert_eq!(metadata.visitors_live, Some(true));
        assert_eq!(
            metadata.start_muted,
            Some(StartMutedPolicy { audio: true, video: false })
        );
        assert_eq!(metadata.moderators, vec!["m1", "m2"]);
        assert_eq!(metadata.participants, vec!["p1"]);
        assert_eq!(metadata.transcribing_enabled, Some(true));
        assert_eq!(metadata.async_transcription, Some(false));
        assert_eq!(metadata.participants_soft_limit, Some(100));
        assert_eq!(metadata.visitors_enabled, Some(true));
    }

    #[test]
    fn test_unknown_properties_ignored() {
        let metadata =
            RoomMetadata::parse(r#"{"futureThing": {"deep": 1}, "visitorsEnabled": false}"#)
                .unwrap();
        assert_eq!(metadata.visitors_enabled, Some(false));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = RoomMetadata::parse(r#"{"visitorsEnabled": true, "visitorsEnabled": false}"#)
            .unwrap_err();
        assert_eq!(err, JsonParseError::DuplicateKey("visitorsEnabled".into()));
    }

    #[test]
    fn test_empty_document() {
        let metadata = RoomMetadata::parse("{}").unwrap();
        assert_eq!(metadata, RoomMetadata::default());
    }
}
