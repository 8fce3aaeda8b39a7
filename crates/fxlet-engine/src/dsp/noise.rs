use crate::param::ParamDescriptor;
use crate::processor::{Message, ParamValues, ProcessorOptions, SampleProcessor};
use crate::registry::ProcessorClass;

pub const PROCESSOR_NAME: &str = "noise-generator";

pub const NOISE_TYPE: usize = 0;

/// Message-only parameter applied after synthesis.
pub const AMPLITUDE: &str = "amplitude";

pub static PARAMS: [ParamDescriptor; 1] = [ParamDescriptor::k_rate("noiseType", 0.0, 0.0, 3.0)];

pub static CLASS: ProcessorClass = ProcessorClass {
    name: "NoiseGenerator",
    extends: "SampleProcessor",
    inputs: 0,
    parameters: &PARAMS,
    construct,
};

fn construct(opts: &ProcessorOptions) -> Box<dyn SampleProcessor> {
    Box::new(NoiseGenerator::new(opts.seed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseType {
    White,
    Pink,
    Brown,
    Digital,
}

impl NoiseType {
    /// Floors the parameter; anything outside 0..=3 is white.
    pub fn from_param(value: f32) -> Self {
        match value.floor() as i32 {
            1 => NoiseType::Pink,
            2 => NoiseType::Brown,
            3 => NoiseType::Digital,
            _ => NoiseType::White,
        }
    }

    pub fn as_param(self) -> f32 {
        match self {
            NoiseType::White => 0.0,
            NoiseType::Pink => 1.0,
            NoiseType::Brown => 2.0,
            NoiseType::Digital => 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Started,
}

/// White, pink, brown and two-level "digital" noise.
///
/// Only start/stop/toggle messages move it between [`State`]s; while stopped
/// every sample is exactly zero.
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    state: State,
    pink: [f32; 6],
    brown: f32,
    amplitude: f32,
    rng: fastrand::Rng,
}

impl NoiseGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            state: State::Stopped,
            pink: [0.0; 6],
            brown: 0.0,
            amplitude: 1.0,
            rng: seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed),
        }
    }

    pub fn state(&self) -> State { self.state }

    #[inline]
    fn white(&mut self) -> f32 {
        self.rng.f32() * 2.0 - 1.0
    }

    // Paul Kellett's refined pink filter
    fn pink(&mut self) -> f32 {
        let w = self.white();
        let b = &mut self.pink;
        b[0] = 0.99886 * b[0] + w * 0.0555179;
        b[1] = 0.99332 * b[1] + w * 0.0750759;
        b[2] = 0.96900 * b[2] + w * 0.1538520;
        b[3] = 0.86650 * b[3] + w * 0.3104856;
        b[4] = 0.55000 * b[4] + w * 0.5329522;
        b[5] = -0.7616 * b[5] - w * 0.0168980;
        let sum: f32 = b.iter().sum();
        (sum + w * 0.5362) * 0.5
    }

    fn brown(&mut self) -> f32 {
        let w = self.white();
        self.brown = (self.brown + 0.02 * w) / 1.02;
        self.brown * 3.5 * 0.5
    }

    fn digital(&mut self) -> f32 {
        if self.rng.bool() { 0.8 } else { -0.8 }
    }
}

impl SampleProcessor for NoiseGenerator {
    fn generate(&mut self, _input: f32, _channel: usize, params: &ParamValues) -> f32 {
        if self.state == State::Stopped {
            return 0.0;
        }
        let raw = match NoiseType::from_param(params[NOISE_TYPE]) {
            NoiseType::White => self.white(),
            NoiseType::Pink => self.pink(),
            NoiseType::Brown => self.brown(),
            NoiseType::Digital => self.digital(),
        };
        raw * self.amplitude
    }

    fn on_message(&mut self, msg: &Message) {
        match *msg {
            Message::Start => self.state = State::Started,
            Message::Stop => self.state = State::Stopped,
            Message::Toggle { active } => {
                self.state = if active { State::Started } else { State::Stopped };
            }
            Message::Param { name: AMPLITUDE, value } => {
                self.amplitude = if value.is_nan() { 1.0 } else { value.clamp(0.0, 1.0) };
            }
            _ => {}
        }
    }

    fn on_dispose(&mut self) {
        self.state = State::Stopped;
    }
}
