//! Event surface
//!
//! Event names and their JSON payloads. Field names are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsp::effects::EffectParams;
use crate::dsp::ControlSettings;
use crate::error::AurisError;

/// Every event the orchestrator accepts
pub const EVENTS: [&str; 11] = [
    "initPipeline",
    "applySettings",
    "updateEQ",
    "updateControls",
    "toggleEffect",
    "updateEffectParams",
    "requestStatus",
    "closeContext",
    "resolveActiveStreamId",
    "hasPipeline",
    "closeAllContexts",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InitPipeline,
    ApplySettings,
    UpdateEq,
    UpdateControls,
    ToggleEffect,
    UpdateEffectParams,
    RequestStatus,
    CloseContext,
    ResolveActiveStreamId,
    HasPipeline,
    CloseAllContexts,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::InitPipeline,
        EventKind::ApplySettings,
        EventKind::UpdateEq,
        EventKind::UpdateControls,
        EventKind::ToggleEffect,
        EventKind::UpdateEffectParams,
        EventKind::RequestStatus,
        EventKind::CloseContext,
        EventKind::ResolveActiveStreamId,
        EventKind::HasPipeline,
        EventKind::CloseAllContexts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::InitPipeline => "initPipeline",
            EventKind::ApplySettings => "applySettings",
            EventKind::UpdateEq => "updateEQ",
            EventKind::UpdateControls => "updateControls",
            EventKind::ToggleEffect => "toggleEffect",
            EventKind::UpdateEffectParams => "updateEffectParams",
            EventKind::RequestStatus => "requestStatus",
            EventKind::CloseContext => "closeContext",
            EventKind::ResolveActiveStreamId => "resolveActiveStreamId",
            EventKind::HasPipeline => "hasPipeline",
            EventKind::CloseAllContexts => "closeAllContexts",
        }
    }

    /// Events that address one stream through `streamId`
    pub fn targets_stream(&self) -> bool {
        !matches!(
            self,
            EventKind::ResolveActiveStreamId | EventKind::CloseAllContexts
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = AurisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| AurisError::UnknownEvent {
                event: s.to_string(),
            })
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Payload carrying only a stream identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPipelinePayload {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f32>,
    /// Raw EQ array, validated by the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlSettings>,
}

/// Settings bundle of `applySettings`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(flatten)]
    pub controls: ControlSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySettingsPayload {
    pub stream_id: String,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateControlsPayload {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlSettings>,
}

/// Either a whole `eq` array or one `index`/`value` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEqPayload {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleEffectPayload {
    pub stream_id: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectParamsPayload {
    pub stream_id: String,
    pub name: String,
    #[serde(default)]
    pub params: EffectParams,
}

/// Decode a payload, reporting malformed input as `InvalidPayload`
pub fn parse_payload<T: serde::de::DeserializeOwned>(
    event: EventKind,
    payload: Value,
) -> Result<T, AurisError> {
    serde_json::from_value(payload)
        .map_err(|e| AurisError::invalid_payload(format!("{}: {}", event, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names_round_trip() {
        assert_eq!(EVENTS.len(), EventKind::ALL.len());
        for name in EVENTS {
            let kind: EventKind = name.parse().unwrap();
            assert_eq!(kind.name(), name);
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = "launchRockets".parse::<EventKind>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid event: launchRockets");
    }

    #[test]
    fn test_apply_settings_flattens_controls() {
        let payload: ApplySettingsPayload = parse_payload(
            EventKind::ApplySettings,
            json!({"streamId": "T1", "settings": {"volumeBoost": 300, "bassBoost": 10}}),
        )
        .unwrap();
        assert_eq!(payload.settings.controls.volume_boost, Some(300.0));
        assert_eq!(payload.settings.controls.bass_boost, Some(10.0));
        assert_eq!(payload.settings.gain, None);
    }

    #[test]
    fn test_missing_stream_id_is_invalid_payload() {
        let err = parse_payload::<StreamPayload>(EventKind::HasPipeline, json!({}))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PAYLOAD");
    }

    #[test]
    fn test_effect_params_default_empty() {
        let payload: EffectParamsPayload = parse_payload(
            EventKind::UpdateEffectParams,
            json!({"streamId": "T1", "name": "echo"}),
        )
        .unwrap();
        assert_eq!(payload.params, EffectParams::default());
    }
}
