//! Focus configuration.
//!
//! Plain deserializable structs with defaults matching production
//! behavior. Loading from file/environment is the embedding binary's
//! concern.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration for the focus core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Domains whose members may claim service-robot roles
    /// (jibri / jigasi / transcriber).
    pub trusted_domains: Vec<String>,
    /// Strict vs lenient occupant address validation.
    pub use_jid_validation: bool,
    pub conference: ConferenceOptions,
    pub bridge: BridgeOptions,
    pub octo: OctoOptions,
    pub visitor: VisitorOptions,
    pub jwt: JwtOptions,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            trusted_domains: Vec::new(),
            use_jid_validation: true,
            conference: ConferenceOptions::default(),
            bridge: BridgeOptions::default(),
            octo: OctoOptions::default(),
            visitor: VisitorOptions::default(),
            jwt: JwtOptions::default(),
        }
    }
}

/// Per-conference behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConferenceOptions {
    /// Deadline for the first participant to reach Established, in
    /// seconds from the first join.
    pub start_timeout_secs: u64,
    /// How long a single unmuted non-visitor participant may idle
    /// before the conference is destroyed, in seconds.
    pub single_participant_timeout_secs: u64,
    /// Ceiling on advertised sources per endpoint.
    pub max_ssrcs_per_user: usize,
    /// Conference size -> source signaling delay in milliseconds; the
    /// largest key not above the current size applies.
    pub source_signaling_delays: BTreeMap<usize, u64>,
    /// Filter simulcast out of outbound source advertisements.
    pub strip_simulcast: bool,
    /// Grant owner to the first eligible member of an ownerless room.
    pub enable_auto_owner: bool,
}

impl Default for ConferenceOptions {
    fn default() -> Self {
        Self {
            start_timeout_secs: 15,
            single_participant_timeout_secs: 20,
            max_ssrcs_per_user: 50,
            source_signaling_delays: BTreeMap::new(),
            strip_simulcast: true,
            enable_auto_owner: true,
        }
    }
}

impl ConferenceOptions {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn single_participant_timeout(&self) -> Duration {
        Duration::from_secs(self.single_participant_timeout_secs)
    }

    /// Source-add/remove coalescing delay for a conference of
    /// `conference_size` participants.
    pub fn source_signaling_delay(&self, conference_size: usize) -> Duration {
        let ms = self
            .source_signaling_delays
            .range(..=conference_size)
            .next_back()
            .map(|(_, ms)| *ms)
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Bridge pool behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Participants per bridge per conference; -1 disables the cap.
    pub max_participants_per_bridge: i64,
    /// Stress level at or above which a bridge counts as overloaded.
    pub stress_threshold: f64,
    /// Reply timeout for bridge requests, in seconds.
    pub reply_timeout_secs: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            max_participants_per_bridge: -1,
            stress_threshold: 0.8,
            reply_timeout_secs: 15,
        }
    }
}

impl BridgeOptions {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn participant_cap(&self) -> Option<usize> {
        if self.max_participants_per_bridge < 0 {
            None
        } else {
            Some(self.max_participants_per_bridge as usize)
        }
    }
}

/// Inter-bridge cascade behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OctoOptions {
    /// Use SCTP data-channels instead of websockets on relays.
    pub sctp_datachannels: bool,
}

impl Default for OctoOptions {
    fn default() -> Self {
        Self { sctp_datachannels: true }
    }
}

/// Visitor admission behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisitorOptions {
    /// Window during which an invited-but-not-joined visitor still
    /// occupies an admission slot, in seconds.
    pub join_latency_window_secs: u64,
}

impl Default for VisitorOptions {
    fn default() -> Self {
        Self { join_latency_window_secs: 30 }
    }
}

impl VisitorOptions {
    pub fn join_latency_window(&self) -> Duration {
        Duration::from_secs(self.join_latency_window_secs)
    }
}

/// JWT validation parameters, consumed by the external auth adapter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JwtOptions {
    pub app_id: Option<String>,
    pub secret: Option<String>,
    pub domain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_signaling_delay_step_function() {
        let mut options = ConferenceOptions::default();
        options.source_signaling_delays = BTreeMap::from([(20, 50), (50, 200), (100, 500)]);

        assert_eq!(options.source_signaling_delay(5), Duration::from_millis(0));
        assert_eq!(options.source_signaling_delay(20), Duration::from_millis(50));
        assert_eq!(options.source_signaling_delay(49), Duration::from_millis(50));
        assert_eq!(options.source_signaling_delay(75), Duration::from_millis(200));
        assert_eq!(options.source_signaling_delay(1000), Duration::from_millis(500));
    }

    #[test]
    fn test_participant_cap_disabled_by_negative() {
        let mut options = BridgeOptions::default();
        assert_eq!(options.participant_cap(), None);
        options.max_participants_per_bridge = 8;
        assert_eq!(options.participant_cap(), Some(8));
    }

    #[test]
    fn test_config_deserializes_from_partial_json() {
        let config: FocusConfig = serde_json::from_str(
            r#"{"trusted_domains": ["auth.example.com"], "conference": {"start_timeout_secs": 30}}"#,
        )
        .unwrap();
        assert_eq!(config.trusted_domains, vec!["auth.example.com"]);
        assert_eq!(config.conference.start_timeout(), Duration::from_secs(30));
        assert_eq!(config.conference.single_participant_timeout_secs, 20);
    }
}
