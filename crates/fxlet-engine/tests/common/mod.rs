#![allow(dead_code)]

use std::sync::Arc;

use fxlet_engine::processor::AudioBlock;
use fxlet_engine::{AudioContext, ContextOptions, Renderer, ScopeRegistry, BLOCK_SIZE};

pub fn context(sample_rate: f32, channels: usize) -> (AudioContext, Renderer) {
    with_registry(sample_rate, channels, ScopeRegistry::builtin())
}

pub fn with_registry(sample_rate: f32, channels: usize, registry: ScopeRegistry) -> (AudioContext, Renderer) {
    let opts = ContextOptions { sample_rate, channels, debug: true };
    AudioContext::new(opts, Arc::new(registry))
}

/// Render one quantum with `input(i)` on every channel.
pub fn quantum(r: &mut Renderer, input: impl Fn(usize) -> f32) -> AudioBlock {
    let mut block = AudioBlock::new(r.channels());
    for c in 0..block.channels() {
        for i in 0..BLOCK_SIZE {
            block.channel_mut(c)[i] = input(i);
        }
    }
    let mut out = AudioBlock::new(r.channels());
    r.render_quantum(&block, &mut out);
    out
}

pub fn silence(r: &mut Renderer) -> AudioBlock {
    quantum(r, |_| 0.0)
}
