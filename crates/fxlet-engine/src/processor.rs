use std::any::Any;
use std::ops::Index;
use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{Receiver, Sender};

use crate::error::ProcessorError;
use crate::graph::NodeId;
use crate::param::{ParamCursor, ParamDescriptor};
use crate::BLOCK_SIZE;

/// Upper bound on automatable parameters per processor.
pub const MAX_PARAMS: usize = 8;

/// Discrete control-to-audio messages. Continuous values travel through
/// [`AutomationParam`](crate::param::AutomationParam) instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Start,
    Stop,
    Toggle { active: bool },
    /// Flush any internal history (delay lines).
    Clear,
    /// Final message; the host stops asking to be kept alive.
    Dispose,
    /// Ad hoc parameter that is not modelled as an automation target.
    Param { name: &'static str, value: f32 },
}

/// Construction options handed to a processor constructor.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    pub sample_rate: f32,
    pub channels: usize,
    /// Fixed seed for processors that draw random numbers.
    pub seed: Option<u64>,
}

/// Planar block of `BLOCK_SIZE` frames.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    data: Vec<[f32; BLOCK_SIZE]>,
}

impl AudioBlock {
    pub fn new(channels: usize) -> Self {
        Self { data: vec![[0.0; BLOCK_SIZE]; channels] }
    }

    pub fn channels(&self) -> usize { self.data.len() }
    pub fn channel(&self, c: usize) -> &[f32; BLOCK_SIZE] { &self.data[c] }
    pub fn channel_mut(&mut self, c: usize) -> &mut [f32; BLOCK_SIZE] { &mut self.data[c] }

    pub fn silence(&mut self) {
        for ch in self.data.iter_mut() {
            ch.fill(0.0);
        }
    }

    /// Copy as many channels as both blocks have; extra channels are silenced.
    pub fn copy_from(&mut self, other: &AudioBlock) {
        for (c, ch) in self.data.iter_mut().enumerate() {
            match other.data.get(c) {
                Some(src) => ch.copy_from_slice(src),
                None => ch.fill(0.0),
            }
        }
    }

    /// Deinterleave up to one block of frames; missing frames are zero.
    pub fn read_interleaved(&mut self, src: &[f32]) {
        self.silence();
        let channels = self.channels();
        if channels == 0 {
            return;
        }
        for (i, frame) in src.chunks(channels).take(BLOCK_SIZE).enumerate() {
            for (c, &s) in frame.iter().enumerate() {
                self.data[c][i] = s;
            }
        }
    }
}

impl Index<usize> for AudioBlock {
    type Output = [f32; BLOCK_SIZE];
    fn index(&self, c: usize) -> &Self::Output { &self.data[c] }
}

/// Parameter values for one sample, in descriptor order.
#[derive(Debug, Clone)]
pub struct ParamValues {
    descriptors: &'static [ParamDescriptor],
    values: [f32; MAX_PARAMS],
}

impl ParamValues {
    pub fn new(descriptors: &'static [ParamDescriptor]) -> Self {
        let mut values = [0.0; MAX_PARAMS];
        for (v, d) in values.iter_mut().zip(descriptors) {
            *v = d.default;
        }
        Self { descriptors, values }
    }

    /// Snapshot with explicit values; missing trailing values keep defaults.
    pub fn with_values(descriptors: &'static [ParamDescriptor], values: &[f32]) -> Self {
        let mut out = Self::new(descriptors);
        for (i, &v) in values.iter().enumerate().take(MAX_PARAMS) {
            out.values[i] = v;
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.descriptors
            .iter()
            .position(|d| d.name == name)
            .map(|i| self.values[i])
    }

    pub fn len(&self) -> usize { self.descriptors.len().min(MAX_PARAMS) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn set(&mut self, index: usize, value: f32) { self.values[index] = value; }
}

impl Index<usize> for ParamValues {
    type Output = f32;
    fn index(&self, i: usize) -> &f32 { &self.values[i] }
}

/// Per-sample DSP contract.
/// - Runs on the audio thread: must not allocate, lock or block.
/// - `generate` is called once per sample and channel, samples outermost.
pub trait SampleProcessor: Send {
    fn generate(&mut self, input: f32, channel: usize, params: &ParamValues) -> f32;
    fn on_message(&mut self, _msg: &Message) {}
    fn on_dispose(&mut self) {}
}

/// Adapts block callbacks into per-sample [`SampleProcessor::generate`] calls.
pub struct ProcessorHost {
    node: NodeId,
    processor: Box<dyn SampleProcessor>,
    cursors: Vec<ParamCursor>,
    snapshot: ParamValues,
    port: Receiver<Message>,
    errors: Sender<ProcessorError>,
    takes_input: bool,
    disposed: bool,
    faulted: bool,
}

impl ProcessorHost {
    pub fn new(
        node: NodeId,
        processor: Box<dyn SampleProcessor>,
        descriptors: &'static [ParamDescriptor],
        cursors: Vec<ParamCursor>,
        takes_input: bool,
        port: Receiver<Message>,
        errors: Sender<ProcessorError>,
    ) -> Self {
        debug_assert!(cursors.len() <= MAX_PARAMS);
        Self {
            node,
            processor,
            cursors,
            snapshot: ParamValues::new(descriptors),
            port,
            errors,
            takes_input,
            disposed: false,
            faulted: false,
        }
    }

    pub fn node(&self) -> NodeId { self.node }
    pub fn takes_input(&self) -> bool { self.takes_input }
    pub fn is_faulted(&self) -> bool { self.faulted }

    /// Render one block. Returns the keep-alive flag: `false` once the
    /// dispose sentinel has been received.
    pub fn process(&mut self, input: Option<&AudioBlock>, output: &mut AudioBlock) -> bool {
        let input = if self.takes_input { input } else { None };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drain_messages();
            if !self.disposed && !self.faulted {
                self.render(input, output);
            }
        }));
        if let Err(payload) = result {
            self.faulted = true;
            let _ = self.errors.try_send(ProcessorError {
                node: self.node,
                message: panic_message(payload),
            });
        }
        if self.disposed || self.faulted {
            output.silence();
        }
        !self.disposed
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.port.try_recv() {
            match msg {
                Message::Dispose => {
                    self.processor.on_dispose();
                    self.disposed = true;
                }
                other => self.processor.on_message(&other),
            }
        }
    }

    fn render(&mut self, input: Option<&AudioBlock>, output: &mut AudioBlock) {
        for cursor in self.cursors.iter_mut() {
            cursor.next_block();
        }
        let channels = output.channels();
        for i in 0..BLOCK_SIZE {
            for (k, cursor) in self.cursors.iter().enumerate() {
                let curve = cursor.block();
                self.snapshot.set(k, if curve.len() == 1 { curve[0] } else { curve[i] });
            }
            for c in 0..channels {
                let x = match input {
                    Some(block) if c < block.channels() => block[c][i],
                    _ => 0.0,
                };
                output.channel_mut(c)[i] = self.processor.generate(x, c, &self.snapshot);
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "processor panicked".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::AutomationParam;
    use crossbeam::channel::bounded;
    use std::sync::Arc;

    const LEVEL: [ParamDescriptor; 1] = [ParamDescriptor::a_rate("level", 1.0, 0.0, 2.0)];

    /// Scales the input by `level` and records what it saw.
    struct Scale {
        seen_channels: usize,
        stopped: bool,
    }

    impl SampleProcessor for Scale {
        fn generate(&mut self, input: f32, channel: usize, params: &ParamValues) -> f32 {
            self.seen_channels = self.seen_channels.max(channel + 1);
            if self.stopped { 0.0 } else { input * params[0] }
        }
        fn on_message(&mut self, msg: &Message) {
            if *msg == Message::Stop {
                self.stopped = true;
            }
        }
    }

    struct Panics;
    impl SampleProcessor for Panics {
        fn generate(&mut self, _: f32, _: usize, _: &ParamValues) -> f32 {
            panic!("boom")
        }
    }

    fn host(
        processor: Box<dyn SampleProcessor>,
        takes_input: bool,
    ) -> (ProcessorHost, Arc<AutomationParam>, Sender<Message>, Receiver<ProcessorError>) {
        let param = Arc::new(AutomationParam::new(LEVEL[0]));
        let (tx, rx) = bounded(16);
        let (etx, erx) = bounded(4);
        let h = ProcessorHost::new(
            NodeId(1),
            processor,
            &LEVEL,
            vec![ParamCursor::new(param.clone())],
            takes_input,
            rx,
            etx,
        );
        (h, param, tx, erx)
    }

    fn ramp_input(channels: usize) -> AudioBlock {
        let mut b = AudioBlock::new(channels);
        for c in 0..channels {
            for i in 0..BLOCK_SIZE {
                b.channel_mut(c)[i] = i as f32 / BLOCK_SIZE as f32;
            }
        }
        b
    }

    #[test]
    fn constant_param_applies_to_every_sample() {
        let (mut h, param, _tx, _e) = host(Box::new(Scale { seen_channels: 0, stopped: false }), true);
        param.set_value(0.5);
        let input = ramp_input(2);
        let mut out = AudioBlock::new(2);
        assert!(h.process(Some(&input), &mut out));
        for c in 0..2 {
            for i in 0..BLOCK_SIZE {
                assert_eq!(out[c][i], input[c][i] * 0.5);
            }
        }
    }

    #[test]
    fn ramped_param_is_indexed_per_sample() {
        let (mut h, param, _tx, _e) = host(Box::new(Scale { seen_channels: 0, stopped: false }), true);
        param.ramp_to(0.0, BLOCK_SIZE as u32);
        let mut input = AudioBlock::new(1);
        input.channel_mut(0).fill(1.0);
        let mut out = AudioBlock::new(1);
        h.process(Some(&input), &mut out);
        assert!(out[0].windows(2).all(|w| w[1] < w[0]));
        assert_eq!(out[0][BLOCK_SIZE - 1], 0.0);
    }

    #[test]
    fn generator_sees_zero_input() {
        let (mut h, _p, _tx, _e) = host(Box::new(Scale { seen_channels: 0, stopped: false }), false);
        let input = ramp_input(2);
        let mut out = AudioBlock::new(2);
        h.process(Some(&input), &mut out);
        assert!(out[1].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn messages_reach_processor_before_rendering() {
        let (mut h, _p, tx, _e) = host(Box::new(Scale { seen_channels: 0, stopped: false }), true);
        tx.send(Message::Stop).unwrap();
        let mut out = AudioBlock::new(1);
        h.process(Some(&ramp_input(1)), &mut out);
        assert!(out[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn dispose_sentinel_ends_keep_alive() {
        let (mut h, _p, tx, _e) = host(Box::new(Scale { seen_channels: 0, stopped: false }), true);
        let mut out = AudioBlock::new(1);
        assert!(h.process(None, &mut out));
        tx.send(Message::Dispose).unwrap();
        assert!(!h.process(None, &mut out));
        assert!(!h.process(None, &mut out));
    }

    #[test]
    fn panic_is_reported_and_silenced() {
        let (mut h, _p, _tx, errors) = host(Box::new(Panics), true);
        let mut out = AudioBlock::new(1);
        out.channel_mut(0).fill(0.3);
        assert!(h.process(Some(&ramp_input(1)), &mut out), "still alive until disposed");
        assert!(h.is_faulted());
        assert!(out[0].iter().all(|&s| s == 0.0));
        let err = errors.try_recv().unwrap();
        assert_eq!(err.node, NodeId(1));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn param_values_lookup_by_name() {
        let v = ParamValues::new(&LEVEL);
        assert_eq!(v.get("level"), Some(1.0));
        assert_eq!(v.get("missing"), None);
        assert_eq!(v.len(), 1);
    }
}
