//! Effects router
//!
//! ```text
//!           ┌─ dry ────────────────────────────┐
//! input ────┤                                  ├── output
//!           └─ [active effects, fixed order] ─ wet ┘
//! ```
//!
//! Every activation change recomputes the desired wiring from the active set
//! and reconciles it against the live wiring, then crossfades dry and wet:
//! wet drops to zero immediately and ramps back to one.

use tracing::debug;

use super::{Echo, EffectKind, EffectModule, EffectParams, Spatializer, Widener};
use crate::dsp::{AudioNode, GainNode};
use crate::engine::{AudioBuffer, AudioParam, ChannelLayout, Topology, Wiring};

/// Wet fade-in after a rebuild, in seconds
const CROSSFADE_SECS: f64 = 0.08;
/// Wet fade-in when the spatializer is in the chain
const SPATIAL_CROSSFADE_SECS: f64 = 0.02;
/// Dry level kept under a chain without the spatializer
const DRY_UNDER_CHAIN: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MixerNode {
    Input,
    Dry,
    Effect(EffectKind),
    Wet,
    Output,
}

/// Assembles the active effects into one serial chain
pub trait EffectsRouter: AudioNode {
    /// Switch one effect and rebuild the chain
    fn set_effect_active(&mut self, kind: EffectKind, active: bool, now: f64);

    /// Forward parameters to one effect
    fn update_effect_params(&mut self, kind: EffectKind, params: &EffectParams, now: f64);

    /// Effects currently wired between input and wet, in signal order
    fn chain(&self) -> Vec<EffectKind>;

    /// Advance effect animation by `delta_ms`
    fn step(&mut self, delta_ms: f64);
}

/// Dry/wet router over the three effects
pub struct EffectsMixer {
    effects: Vec<Box<dyn EffectModule>>,
    dry: GainNode,
    wet: GainNode,
    wiring: Wiring<MixerNode>,
    /// Effects on the wired wet path, refreshed on every rebuild
    active_chain: Vec<EffectKind>,
    wet_buffer: AudioBuffer,
}

impl EffectsMixer {
    pub fn new(sample_rate: u32) -> Self {
        let effects: Vec<Box<dyn EffectModule>> = vec![
            Box::new(Spatializer::new(sample_rate)),
            Box::new(Widener::new(sample_rate)),
            Box::new(Echo::new(sample_rate)),
        ];
        let mut mixer = Self {
            effects,
            dry: GainNode::new(1.0, sample_rate),
            wet: GainNode::new(0.0, sample_rate),
            wiring: Wiring::new(),
            active_chain: Vec::new(),
            wet_buffer: AudioBuffer::with_sample_rate(0, ChannelLayout::Stereo, sample_rate),
        };
        mixer.reconnect(0.0);
        mixer
    }

    pub fn dry_gain(&self) -> &AudioParam {
        &self.dry.gain
    }

    pub fn wet_gain(&self) -> &AudioParam {
        &self.wet.gain
    }

    pub fn is_active(&self, kind: EffectKind) -> bool {
        self.effect(kind).is_some_and(|fx| fx.is_active())
    }

    fn effect(&self, kind: EffectKind) -> Option<&dyn EffectModule> {
        self.effects
            .iter()
            .find(|fx| fx.kind() == kind)
            .map(|fx| fx.as_ref())
    }

    fn effect_mut(&mut self, kind: EffectKind) -> Option<&mut Box<dyn EffectModule>> {
        self.effects.iter_mut().find(|fx| fx.kind() == kind)
    }

    /// Wiring for the current activation flags
    fn desired_topology(&self) -> Topology<MixerNode> {
        let mut topology = Topology::new();
        topology
            .chain(&[MixerNode::Input, MixerNode::Dry, MixerNode::Output])
            .connect(MixerNode::Wet, MixerNode::Output);

        let mut active: Vec<EffectKind> = self
            .effects
            .iter()
            .filter(|fx| fx.is_active())
            .map(|fx| fx.kind())
            .collect();
        active.sort();
        if !active.is_empty() {
            let mut path = vec![MixerNode::Input];
            path.extend(active.into_iter().map(MixerNode::Effect));
            path.push(MixerNode::Wet);
            topology.chain(&path);
        }
        topology
    }

    /// Effects on the live input to wet path, in signal order
    fn wired_chain(&self) -> Vec<EffectKind> {
        self.wiring
            .current()
            .path(MixerNode::Input, MixerNode::Wet)
            .map(|path| {
                path.into_iter()
                    .filter_map(|node| match node {
                        MixerNode::Effect(kind) => Some(kind),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn reconnect(&mut self, now: f64) {
        let diff = self.wiring.reconcile(self.desired_topology());
        self.active_chain = self.wired_chain();
        let chain = &self.active_chain;
        debug!(
            chain = ?chain,
            removed = diff.removed.len(),
            added = diff.added.len(),
            "Effects chain rebuilt"
        );

        if chain.is_empty() {
            set_immediate(&mut self.dry.gain, 1.0, now);
            set_immediate(&mut self.wet.gain, 0.0, now);
            return;
        }

        let spatial = chain.contains(&EffectKind::Spatializer);
        set_immediate(&mut self.wet.gain, 0.0, now);

        self.dry.gain.cancel_scheduled_values(now);
        let dry = if spatial { 0.0 } else { DRY_UNDER_CHAIN };
        self.dry.gain.set_value_at_time(dry, now);

        let ramp = if spatial {
            SPATIAL_CROSSFADE_SECS
        } else {
            CROSSFADE_SECS
        };
        self.wet.gain.linear_ramp_to_value_at_time(1.0, now + ramp, now);
    }
}

fn set_immediate(param: &mut AudioParam, value: f32, now: f64) {
    param.cancel_scheduled_values(now);
    param.set_value_at_time(value, now);
}

impl EffectsRouter for EffectsMixer {
    fn set_effect_active(&mut self, kind: EffectKind, active: bool, now: f64) {
        if let Some(fx) = self.effect_mut(kind) {
            fx.set_active(active, now);
        }
        self.reconnect(now);
    }

    fn update_effect_params(&mut self, kind: EffectKind, params: &EffectParams, now: f64) {
        if let Some(fx) = self.effect_mut(kind) {
            fx.update_params(params, now);
        }
    }

    fn chain(&self) -> Vec<EffectKind> {
        self.active_chain.clone()
    }

    fn step(&mut self, delta_ms: f64) {
        for fx in &mut self.effects {
            fx.step(delta_ms);
        }
    }
}

impl AudioNode for EffectsMixer {
    fn process(&mut self, buffer: &mut AudioBuffer, start_time: f64) {
        let has_wet = !self.active_chain.is_empty();

        if has_wet {
            self.wet_buffer.copy_from(buffer);
            // Effects are stored in chain priority order
            let chain = &self.active_chain;
            for fx in self
                .effects
                .iter_mut()
                .filter(|fx| chain.contains(&fx.kind()))
            {
                fx.process(&mut self.wet_buffer, start_time);
            }
            self.wet.process(&mut self.wet_buffer, start_time);
        }

        self.dry.process(buffer, start_time);
        if has_wet {
            buffer.mix_from(&self.wet_buffer, 1.0);
        }
    }

    fn reset(&mut self) {
        for fx in &mut self.effects {
            fx.reset();
        }
    }
}
