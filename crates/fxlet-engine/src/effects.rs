//! Canonical effect schemas and thin typed handles over [`EffectNode`].

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bridge::{EffectDescriptor, EffectNode, NodeOptions, ParamSpec, Unit, DEFAULT_RAMP, WET_SPEC};
use crate::context::AudioContext;
use crate::dsp::noise::{self, NoiseType};
use crate::dsp::{bit_crusher, delay};
use crate::error::BridgeError;
use crate::processor::Message;

pub static BIT_CRUSHER: EffectDescriptor = EffectDescriptor {
    processor: bit_crusher::PROCESSOR_NAME,
    params: &[ParamSpec::automated("bits", Unit::Bits, 1.0, 16.0, 4.0)],
    crossfade: true,
};

pub static DELAY: EffectDescriptor = EffectDescriptor {
    processor: delay::PROCESSOR_NAME,
    params: &[
        ParamSpec::automated("delayTime", Unit::Seconds, 0.0, delay::MAX_DELAY_SECONDS, 0.5),
        ParamSpec::automated("feedback", Unit::NormalRange, 0.0, 0.99, 0.5),
    ],
    crossfade: true,
};

pub static NOISE_GENERATOR: EffectDescriptor = EffectDescriptor {
    processor: noise::PROCESSOR_NAME,
    params: &[
        ParamSpec::automated("noiseType", Unit::Index, 0.0, 3.0, 0.0),
        ParamSpec::message(noise::AMPLITUDE, Unit::NormalRange, 0.0, 1.0, 1.0),
    ],
    crossfade: true,
};

// Typed setters on descriptor-declared names cannot miss.
fn known(result: Result<(), BridgeError>) {
    debug_assert!(result.is_ok(), "{result:?}");
}

macro_rules! effect_handle {
    ($name:ident) => {
        impl Deref for $name {
            type Target = EffectNode;
            fn deref(&self) -> &EffectNode { &self.node }
        }

        impl $name {
            pub fn set_wet(&self, wet: f32) { known(self.node.ramp(WET_SPEC.name, wet, DEFAULT_RAMP)) }
            pub fn wet(&self) -> f32 { self.node.get(WET_SPEC.name).unwrap_or(WET_SPEC.default) }
            pub fn into_node(self) -> EffectNode { self.node }
        }
    };
}

/* ---------- bit crusher ---------- */

pub struct BitCrusher {
    node: EffectNode,
}

effect_handle!(BitCrusher);

impl BitCrusher {
    pub fn new(ctx: &AudioContext, options: NodeOptions) -> Result<Self, BridgeError> {
        Ok(Self { node: EffectNode::new(ctx, &BIT_CRUSHER, options)? })
    }

    pub fn set_bits(&self, bits: f32) { known(self.node.ramp("bits", bits, DEFAULT_RAMP)) }
    pub fn bits(&self) -> f32 { self.node.get("bits").unwrap_or(4.0) }
}

/* ---------- delay ---------- */

pub struct Delay {
    node: EffectNode,
}

effect_handle!(Delay);

impl Delay {
    pub fn new(ctx: &AudioContext, options: NodeOptions) -> Result<Self, BridgeError> {
        Ok(Self { node: EffectNode::new(ctx, &DELAY, options)? })
    }

    pub fn set_delay_time(&self, seconds: f32) { known(self.node.ramp("delayTime", seconds, DEFAULT_RAMP)) }
    pub fn delay_time(&self) -> f32 { self.node.get("delayTime").unwrap_or(0.5) }

    pub fn set_feedback(&self, feedback: f32) { known(self.node.ramp("feedback", feedback, DEFAULT_RAMP)) }
    pub fn feedback(&self) -> f32 { self.node.get("feedback").unwrap_or(0.5) }

    /// Drop every echo still circulating.
    pub fn clear(&self) { self.node.post(Message::Clear) }
}

/* ---------- noise ---------- */

/// Silent until started; `autostart` in the options starts it as soon as
/// the processor exists.
pub struct NoiseGenerator {
    node: EffectNode,
    playing: AtomicBool,
}

effect_handle!(NoiseGenerator);

impl NoiseGenerator {
    pub fn new(ctx: &AudioContext, options: NodeOptions) -> Result<Self, BridgeError> {
        let playing = AtomicBool::new(options.autostart);
        Ok(Self { node: EffectNode::new(ctx, &NOISE_GENERATOR, options)?, playing })
    }

    pub fn start(&self) {
        if !self.playing.swap(true, Ordering::AcqRel) {
            self.node.post(Message::Start);
        }
    }

    pub fn stop(&self) {
        if self.playing.swap(false, Ordering::AcqRel) {
            self.node.post(Message::Stop);
        }
    }

    pub fn toggle(&self, active: bool) {
        self.playing.store(active, Ordering::Release);
        self.node.post(Message::Toggle { active });
    }

    pub fn is_playing(&self) -> bool { self.playing.load(Ordering::Acquire) }

    /// Index changes are not ramped; a ramp would sweep through the types.
    pub fn set_noise_type(&self, kind: NoiseType) { known(self.node.set("noiseType", kind.as_param())) }

    pub fn noise_type(&self) -> NoiseType {
        NoiseType::from_param(self.node.get("noiseType").unwrap_or(0.0))
    }

    pub fn set_amplitude(&self, amplitude: f32) { known(self.node.set(noise::AMPLITUDE, amplitude)) }

    /// Stops the generator before disposing the node.
    pub fn dispose(&self) {
        self.stop();
        self.node.dispose();
    }
}
