//! Spatial effects and the router that chains them
//!
//! Three effects, always in this priority order when active:
//! - `audio8d`: rotational spatializer (LFO-driven panning)
//! - `surround`: stereo widener (left-channel delay offset)
//! - `echo`: feedback delay

mod echo;
mod mixer;
mod spatializer;
mod widener;

pub use echo::Echo;
pub use mixer::{EffectsMixer, EffectsRouter};
pub use spatializer::Spatializer;
pub use widener::Widener;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::AudioNode;
use crate::error::AurisError;

/// The fixed set of effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    #[serde(rename = "audio8d")]
    Spatializer,
    #[serde(rename = "surround")]
    Widener,
    #[serde(rename = "echo")]
    Echo,
}

impl EffectKind {
    /// Every effect in chain priority order
    pub const ALL: [EffectKind; 3] = [EffectKind::Spatializer, EffectKind::Widener, EffectKind::Echo];

    /// Event-surface name
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Spatializer => "audio8d",
            EffectKind::Widener => "surround",
            EffectKind::Echo => "echo",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = AurisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| AurisError::invalid_payload(format!("unknown effect '{}'", s)))
    }
}

/// Effect parameters; each effect reads only its own fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectParams {
    /// Spatializer rotation period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    /// Widener depth in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f32>,
    /// Echo delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f32>,
    /// Echo feedback ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<f32>,
    /// Echo wet level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wet: Option<f32>,
}

/// One effect the router can place in its chain
pub trait EffectModule: AudioNode {
    fn kind(&self) -> EffectKind;

    fn is_active(&self) -> bool;

    /// Switch the effect on or off at graph time `now`
    fn set_active(&mut self, active: bool, now: f64);

    /// Apply the fields of `params` this effect understands
    fn update_params(&mut self, params: &EffectParams, now: f64);

    /// Per-tick animation hook, called with the elapsed milliseconds
    fn step(&mut self, _delta_ms: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_names_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(kind.name().parse::<EffectKind>().unwrap(), kind);
        }
        assert_eq!(
            serde_json::to_string(&EffectKind::Spatializer).unwrap(),
            "\"audio8d\""
        );
    }

    #[test]
    fn test_unknown_effect_rejected() {
        let err = "reverb".parse::<EffectKind>().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PAYLOAD");
    }

    #[test]
    fn test_priority_order() {
        let mut kinds = vec![EffectKind::Echo, EffectKind::Spatializer, EffectKind::Widener];
        kinds.sort();
        assert_eq!(kinds, EffectKind::ALL.to_vec());
    }
}
