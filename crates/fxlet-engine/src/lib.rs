//! Real-time effect nodes (bit crusher, feedback delay, noise) behind a
//! control-thread bridge, rendered in 128-frame quanta by a lock-free
//! [`Renderer`](graph::Renderer) that can live inside a cpal callback.

pub mod bridge;
mod capture;
pub mod context;
pub mod devices;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod graph;
pub mod offline;
pub mod param;
pub mod processor;
pub mod registry;
pub mod ring_buffer;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use serde::Deserialize;
use tracing::{error, info, warn};

use capture::{next_pow2, CaptureRing};
use processor::AudioBlock;

pub use bridge::{EffectDescriptor, EffectNode, NodeOptions, ParamCell, ParamSpec, Ready, ReadyState, DEFAULT_RAMP};
pub use context::{AudioContext, ContextOptions};
pub use effects::{BitCrusher, Delay, NoiseGenerator};
pub use error::{BridgeError, ProcessorError, RegistryError, ScopeError};
pub use graph::{NodeId, Renderer};
pub use processor::Message;
pub use registry::ScopeRegistry;

/// Frames per render quantum.
pub const BLOCK_SIZE: usize = 128;

/// Frames of interleaved scratch the output callback renders into at a time.
const MIX_FRAMES: usize = 8192;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub input_name: Option<String>,       // match by substring (case-insensitive)
    pub output_name: Option<String>,
    pub input_index: Option<usize>,       // index from the device list
    pub output_index: Option<usize>,
    pub sample_rate: Option<u32>,
    pub block_size: Option<u32>,          // frames per device buffer, if the backend allows
    /// Feed the graph from an input device instead of silence.
    pub duplex: bool,
    /// Install the processor scope with its debug header.
    pub debug_scope: bool,
}

/// Live driver: an output stream that owns the [`Renderer`], plus an
/// optional capture stream feeding it.
pub struct Engine {
    cfg: EngineConfig,
    output: cpal::Device,
    out_cfg: cpal::StreamConfig,
    out_format: cpal::SampleFormat,
    input: Option<(cpal::Device, cpal::StreamConfig, cpal::SampleFormat)>,
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
}

impl Engine {
    /// Pick devices and settle the stream format. Nothing plays yet.
    pub fn open(cfg: EngineConfig) -> Result<Self> {
        let host = cpal::default_host();

        let output = pick_device(&host, false, cfg.output_name.as_deref(), cfg.output_index)?
            .context("No output device matched (and no default available)")?;
        let out_any = output.default_output_config().context("No default output config")?;
        let out_format = out_any.sample_format();
        let mut out_cfg = out_any.config();
        if let Some(sr) = cfg.sample_rate {
            out_cfg.sample_rate = cpal::SampleRate(sr);
        }
        if let Some(bs) = cfg.block_size {
            out_cfg.buffer_size = cpal::BufferSize::Fixed(bs);
        }

        let input = if cfg.duplex {
            let dev = pick_device(&host, true, cfg.input_name.as_deref(), cfg.input_index)?
                .context("No input device matched (and no default available)")?;
            let in_any = dev.default_input_config().context("No default input config")?;
            let format = in_any.sample_format();
            let mut in_cfg = in_any.config();
            // capture must match the render format frame for frame
            in_cfg.channels = out_cfg.channels;
            in_cfg.sample_rate = out_cfg.sample_rate;
            in_cfg.buffer_size = out_cfg.buffer_size.clone();
            Some((dev, in_cfg, format))
        } else {
            None
        };

        info!(
            output = %output.name().unwrap_or_default(),
            sample_rate = out_cfg.sample_rate.0,
            channels = out_cfg.channels,
            duplex = input.is_some(),
            "audio devices opened"
        );
        Ok(Self { cfg, output, out_cfg, out_format, input, input_stream: None, output_stream: None })
    }

    pub fn config(&self) -> &EngineConfig { &self.cfg }

    /// Options for the [`AudioContext`] whose renderer this engine will play.
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            sample_rate: self.out_cfg.sample_rate.0 as f32,
            channels: self.out_cfg.channels as usize,
            debug: self.cfg.debug_scope,
        }
    }

    pub fn is_running(&self) -> bool { self.output_stream.is_some() }

    /// Move `renderer` onto the output callback and start playing.
    pub fn start(&mut self, renderer: Renderer) -> Result<()> {
        let channels = self.out_cfg.channels as usize;
        if renderer.channels() != channels {
            bail!("renderer has {} channels, output device has {channels}", renderer.channels());
        }
        if renderer.sample_rate() != self.out_cfg.sample_rate.0 as f32 {
            warn!(
                renderer = renderer.sample_rate(),
                device = self.out_cfg.sample_rate.0,
                "sample rate mismatch; effects will be detuned"
            );
        }

        let capture = match &self.input {
            Some((dev, in_cfg, format)) => {
                let frames = match in_cfg.buffer_size {
                    cpal::BufferSize::Fixed(n) => n as usize * 8,
                    _ => 4096,
                };
                let ring = Arc::new(CaptureRing::with_capacity(next_pow2(frames * channels).max(1024)));
                let stream = match format {
                    cpal::SampleFormat::F32 => build_input::<f32>(dev, in_cfg, ring.clone())?,
                    cpal::SampleFormat::I16 => build_input::<i16>(dev, in_cfg, ring.clone())?,
                    cpal::SampleFormat::U16 => build_input::<u16>(dev, in_cfg, ring.clone())?,
                    other => bail!("Unsupported input format: {other:?}"),
                };
                stream.play().context("Failed to play input stream")?;
                self.input_stream = Some(stream);
                Some(ring)
            }
            None => None,
        };

        let stream = match self.out_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&self.output, &self.out_cfg, renderer, capture)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&self.output, &self.out_cfg, renderer, capture)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&self.output, &self.out_cfg, renderer, capture)?,
            other => bail!("Unsupported output format: {other:?}"),
        };
        stream.play().context("Failed to play output stream")?;
        self.output_stream = Some(stream);
        info!("engine started");
        Ok(())
    }

    /// Drops both streams; the renderer goes with the output callback.
    pub fn stop(&mut self) {
        self.input_stream = None;
        if self.output_stream.take().is_some() {
            info!("engine stopped");
        }
    }
}

fn build_input<T>(dev: &cpal::Device, cfg: &cpal::StreamConfig, ring: Arc<CaptureRing>) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch = Vec::<f32>::with_capacity(ring.capacity());
    let stream = dev.build_input_stream(
        cfg,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            // overrun: drop this buffer rather than block
            let _ = ring.push_slice(&scratch);
        },
        |err| error!("input stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

fn build_output<T>(
    dev: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut renderer: Renderer,
    capture: Option<Arc<CaptureRing>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = cfg.channels as usize;
    let frames = match cfg.buffer_size {
        cpal::BufferSize::Fixed(n) => (n as usize).max(MIX_FRAMES),
        _ => MIX_FRAMES,
    };
    let mut mix = vec![0.0f32; frames * channels.max(1)];
    let mut captured = vec![0.0f32; BLOCK_SIZE * channels];
    let stream = dev.build_output_stream(
        cfg,
        move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
            render_chunked(&mut renderer, &mut mix, out, |block| {
                let filled = capture.as_ref().is_some_and(|ring| ring.pop_into(&mut captured));
                if filled { block.read_interleaved(&captured) } else { block.silence() }
            });
        },
        |err| error!("output stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

/// Fill a device buffer of any size through the fixed `mix` scratch, one
/// mix-sized piece at a time. `mix.len()` must be a multiple of the channel
/// count.
fn render_chunked<T>(renderer: &mut Renderer, mix: &mut [f32], out: &mut [T], mut capture: impl FnMut(&mut AudioBlock))
where
    T: SizedSample + FromSample<f32>,
{
    for chunk in out.chunks_mut(mix.len()) {
        let buf = &mut mix[..chunk.len()];
        renderer.render_interleaved(buf, &mut capture);
        for (o, &s) in chunk.iter_mut().zip(buf.iter()) {
            *o = T::from_sample(s.clamp(-1.0, 1.0));
        }
    }
}

/* ---------- device picking (by index, name, or default) ---------- */

fn supports(dev: &cpal::Device, input: bool) -> bool {
    if input {
        dev.supported_input_configs().is_ok_and(|mut c| c.next().is_some())
    } else {
        dev.supported_output_configs().is_ok_and(|mut c| c.next().is_some())
    }
}

pub(crate) fn pick_device(
    host: &cpal::Host,
    want_input: bool,
    name_substr: Option<&str>,
    index: Option<usize>,
) -> Result<Option<cpal::Device>> {
    if let Some(idx) = index {
        if let Some(dev) = host.devices()?.filter(|d| supports(d, want_input)).nth(idx) {
            return Ok(Some(dev));
        }
        warn!(index = idx, "no device at index; trying name and default");
    }

    if let Some(q) = name_substr {
        let q = q.to_lowercase();
        let found = host
            .devices()?
            .find(|d| d.name().unwrap_or_default().to_lowercase().contains(&q) && supports(d, want_input));
        if found.is_some() {
            return Ok(found);
        }
        warn!(name = %q, "no device matched; using default");
    }

    Ok(if want_input { host.default_input_device() } else { host.default_output_device() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(block: &mut AudioBlock, next: &mut usize) {
        for i in 0..BLOCK_SIZE {
            for c in 0..block.channels() {
                block.channel_mut(c)[i] = ((*next + i) % 200) as f32 / 400.0;
            }
        }
        *next += BLOCK_SIZE;
    }

    #[test]
    fn device_buffers_larger_than_the_mix_are_chunked() {
        let opts = ContextOptions { sample_rate: 48_000.0, channels: 2, debug: false };
        let (_a, mut whole) = AudioContext::new(opts, Arc::new(ScopeRegistry::builtin()));
        let (_b, mut chunked) = AudioContext::new(opts, Arc::new(ScopeRegistry::builtin()));

        let mut expected = vec![0.0f32; 1_000 * 2];
        let mut next = 0;
        whole.render_interleaved(&mut expected, |b| ramp(b, &mut next));

        let mut mix = vec![0.0f32; 48 * 2];
        let mut out = vec![0i16; 1_000 * 2];
        let mut next = 0;
        render_chunked(&mut chunked, &mut mix, &mut out, |b| ramp(b, &mut next));

        let want: Vec<i16> = expected.iter().map(|&s| i16::from_sample(s)).collect();
        assert_eq!(out, want);
        assert_eq!(chunked.frames_rendered(), whole.frames_rendered());
    }
}
