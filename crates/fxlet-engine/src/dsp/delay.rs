use crate::param::ParamDescriptor;
use crate::processor::{Message, ParamValues, ProcessorOptions, SampleProcessor};
use crate::registry::ProcessorClass;
use crate::ring_buffer::RingBuffer;

pub const PROCESSOR_NAME: &str = "delay-processor";

/// Longest supported delay; sizes every channel's line.
pub const MAX_DELAY_SECONDS: f32 = 2.0;

pub const DELAY_TIME: usize = 0;
pub const FEEDBACK: usize = 1;

/// Per-sample weight of the previous smoothed feedback value.
pub const FEEDBACK_SMOOTHING: f32 = 0.9;

pub static PARAMS: [ParamDescriptor; 2] = [
    ParamDescriptor::k_rate("delayTime", 0.5, 0.0, MAX_DELAY_SECONDS),
    ParamDescriptor::k_rate("feedback", 0.5, 0.0, 0.99),
];

pub static CLASS: ProcessorClass = ProcessorClass {
    name: "FeedbackDelay",
    extends: "SampleProcessor",
    inputs: 1,
    parameters: &PARAMS,
    construct,
};

fn construct(opts: &ProcessorOptions) -> Box<dyn SampleProcessor> {
    Box::new(FeedbackDelay::new(opts.sample_rate, opts.channels))
}

/// Integer-sample feedback delay with a hard-clipped write path.
///
/// Returns only the delayed (wet) signal; mixing with the dry input happens in
/// the unit's crossfade. A delay of `d` samples surfaces an input `d + 1`
/// samples later because the read happens before the write.
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    lines: Vec<RingBuffer>,
    smoothed: Vec<f32>,
    sample_rate: f32,
}

impl FeedbackDelay {
    pub fn new(sample_rate: f32, channels: usize) -> Self {
        Self {
            lines: (0..channels)
                .map(|_| RingBuffer::for_duration(MAX_DELAY_SECONDS, sample_rate, 1))
                .collect(),
            smoothed: vec![0.0; channels],
            sample_rate,
        }
    }

    pub fn smoothed_feedback(&self, channel: usize) -> f32 { self.smoothed[channel] }

    /// Drop every pending echo.
    pub fn clear(&mut self) {
        for line in self.lines.iter_mut() {
            line.clear();
        }
    }
}

impl SampleProcessor for FeedbackDelay {
    #[inline]
    fn generate(&mut self, input: f32, channel: usize, params: &ParamValues) -> f32 {
        let Some(line) = self.lines.get_mut(channel) else { return 0.0 };
        let delay_samples = (params[DELAY_TIME] * self.sample_rate).floor();
        let delayed = line.get(0, delay_samples);

        let fb = &mut self.smoothed[channel];
        *fb = FEEDBACK_SMOOTHING * *fb + (1.0 - FEEDBACK_SMOOTHING) * params[FEEDBACK];

        line.push(0, (input + delayed * *fb).clamp(-1.0, 1.0));
        delayed
    }

    fn on_message(&mut self, msg: &Message) {
        if let Message::Clear = msg {
            self.clear();
        }
    }
}
