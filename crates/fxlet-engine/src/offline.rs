//! Rendering without an audio device.

use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::graph::Renderer;
use crate::BLOCK_SIZE;

/// `amplitude · sin(2π·freq·n / sample_rate)` by frame index.
pub fn sine(freq: f32, sample_rate: f32, amplitude: f32) -> impl FnMut(usize) -> f32 {
    let w = 2.0 * std::f32::consts::PI * freq / sample_rate;
    move |n| amplitude * (w * n as f32).sin()
}

/// Render `frames` frames, feeding `source(frame)` to every input channel.
/// Returns interleaved output.
pub fn render(renderer: &mut Renderer, frames: usize, mut source: impl FnMut(usize) -> f32) -> Vec<f32> {
    let mut out = vec![0.0; frames * renderer.channels()];
    let mut next = 0;
    renderer.render_interleaved(&mut out, |block| {
        for i in 0..BLOCK_SIZE {
            let s = source(next + i);
            for c in 0..block.channels() {
                block.channel_mut(c)[i] = s;
            }
        }
        next += BLOCK_SIZE;
    });
    out
}

/// 32-bit float WAV.
pub fn write_wav(path: &Path, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize().context("finalizing wav")?;
    Ok(())
}
