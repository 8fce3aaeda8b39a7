use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationRate {
    /// One value per sample.
    ARate,
    /// One value per block.
    KRate,
}

impl AutomationRate {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationRate::ARate => "a-rate",
            AutomationRate::KRate => "k-rate",
        }
    }
}

/// Static description of one automatable processor parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub rate: AutomationRate,
}

impl ParamDescriptor {
    pub const fn k_rate(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self { name, default, min, max, rate: AutomationRate::KRate }
    }

    pub const fn a_rate(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self { name, default, min, max, rate: AutomationRate::ARate }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() { self.default } else { value.clamp(self.min, self.max) }
    }
}

/// Live automation target shared between the control thread and one
/// real-time cursor.
///
/// The control side publishes target and ramp length together in one word,
/// then bumps `epoch` with release ordering. The audio side only ever loads,
/// so neither side can block the other.
#[derive(Debug)]
pub struct AutomationParam {
    descriptor: ParamDescriptor,
    scheduled: AtomicU64, // f32 target bits << 32 | ramp frames
    epoch: AtomicU32,
}

#[inline]
fn pack(target: f32, frames: u32) -> u64 {
    (u64::from(target.to_bits()) << 32) | u64::from(frames)
}

#[inline]
fn unpack(word: u64) -> (f32, u32) {
    (f32::from_bits((word >> 32) as u32), word as u32)
}

impl AutomationParam {
    pub fn new(descriptor: ParamDescriptor) -> Self {
        Self::with_value(descriptor, descriptor.default)
    }

    pub fn with_value(descriptor: ParamDescriptor, value: f32) -> Self {
        Self {
            scheduled: AtomicU64::new(pack(descriptor.clamp(value), 0)),
            epoch: AtomicU32::new(0),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &ParamDescriptor { &self.descriptor }
    pub fn name(&self) -> &'static str { self.descriptor.name }

    /// Most recently requested value (the ramp end point while ramping).
    pub fn target(&self) -> f32 {
        unpack(self.scheduled.load(Ordering::Acquire)).0
    }

    /// Jump to `value` at the start of the next block.
    pub fn set_value(&self, value: f32) {
        self.schedule(value, 0);
    }

    /// Ramp linearly from wherever the audio side currently is to `value`
    /// over `frames` samples.
    pub fn ramp_to(&self, value: f32, frames: u32) {
        self.schedule(value, frames);
    }

    fn schedule(&self, value: f32, frames: u32) {
        self.scheduled.store(pack(self.descriptor.clamp(value), frames), Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::Release);
    }
}

/// Audio-thread view of an [`AutomationParam`]: renders one block's worth of
/// values without allocating.
#[derive(Debug)]
pub struct ParamCursor {
    param: Arc<AutomationParam>,
    seen_epoch: u32,
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    curve: [f32; BLOCK_SIZE],
    len: usize,
}

impl ParamCursor {
    pub fn new(param: Arc<AutomationParam>) -> Self {
        let current = param.target();
        Self {
            seen_epoch: param.epoch.load(Ordering::Acquire),
            current,
            target: current,
            step: 0.0,
            remaining: 0,
            curve: [current; BLOCK_SIZE],
            len: 1,
            param,
        }
    }

    pub fn param(&self) -> &Arc<AutomationParam> { &self.param }

    /// Pick up control-side changes and render the next block.
    ///
    /// The returned slice has length 1 when the value is constant for the
    /// block (always the case for k-rate parameters) and `BLOCK_SIZE` while an
    /// a-rate ramp is running.
    pub fn next_block(&mut self) -> &[f32] {
        let epoch = self.param.epoch.load(Ordering::Acquire);
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            let (target, frames) = unpack(self.param.scheduled.load(Ordering::Relaxed));
            self.target = target;
            if frames == 0 {
                self.current = self.target;
                self.remaining = 0;
            } else {
                self.step = (self.target - self.current) / frames as f32;
                self.remaining = frames;
            }
        }

        if self.remaining == 0 {
            self.curve[0] = self.current;
            self.len = 1;
            return &self.curve[..1];
        }

        match self.param.descriptor.rate {
            AutomationRate::KRate => {
                self.curve[0] = self.current;
                self.len = 1;
                let n = self.remaining.min(BLOCK_SIZE as u32);
                self.advance(n);
            }
            AutomationRate::ARate => {
                for i in 0..BLOCK_SIZE {
                    self.advance(1);
                    self.curve[i] = self.current;
                }
                self.len = BLOCK_SIZE;
            }
        }
        &self.curve[..self.len]
    }

    /// Block rendered by the last `next_block` call.
    pub fn block(&self) -> &[f32] { &self.curve[..self.len] }

    #[inline]
    fn advance(&mut self, frames: u32) {
        if self.remaining == 0 {
            return;
        }
        if frames >= self.remaining {
            self.current = self.target;
            self.remaining = 0;
        } else {
            self.current += self.step * frames as f32;
            self.remaining -= frames;
        }
    }
}
