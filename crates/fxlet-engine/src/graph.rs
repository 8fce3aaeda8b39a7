use std::fmt;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::dsp::crossfade::Crossfade;
use crate::processor::{AudioBlock, ProcessorHost};
use crate::BLOCK_SIZE;

/// Most units the audio thread will hold at once, live and bypassed
/// together; both vectors are allocated up front so attaching never
/// reallocates on the audio thread.
pub const MAX_UNITS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a unit's processed signal reaches its output.
pub enum Routing {
    /// input → processor → crossfade.b, input → crossfade.a, crossfade → out
    Crossfade(Crossfade),
    /// processor → out
    WetOnly,
}

/// Audio-thread half of one effect node.
pub struct EffectUnit {
    host: ProcessorHost,
    routing: Routing,
    wet: AudioBlock,
}

impl EffectUnit {
    pub fn new(host: ProcessorHost, routing: Routing, channels: usize) -> Self {
        Self { host, routing, wet: AudioBlock::new(channels) }
    }

    pub fn id(&self) -> NodeId { self.host.node() }

    /// Returns the host's keep-alive flag.
    pub fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) -> bool {
        let alive = self.host.process(Some(input), &mut self.wet);
        match &mut self.routing {
            Routing::Crossfade(xf) => xf.process(input, &self.wet, output),
            Routing::WetOnly => output.copy_from(&self.wet),
        }
        alive
    }
}

/// Control-to-audio unit transfers. Ordering travels separately through
/// [`PathMailbox`].
pub enum GraphCommand {
    /// Hand a built unit to the audio thread. It stays bypassed until the
    /// published path names it.
    Attach { unit: Box<EffectUnit> },
    /// Send the unit back to the control thread for dropping.
    Release { id: NodeId },
}

/// Latest serial path, published by the control thread and read once per
/// quantum by the renderer. A sequence lock: the single writer makes `seq`
/// odd while it copies ids in; a reader that sees `seq` move retries on the
/// next quantum. The last write always wins, no edit can be lost to a full
/// queue.
pub struct PathMailbox {
    seq: AtomicU64,
    len: AtomicUsize,
    ids: [AtomicU64; MAX_UNITS],
}

impl PathMailbox {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            ids: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Single writer only; the context calls this under its graph lock.
    /// Paths longer than [`MAX_UNITS`] are truncated.
    pub(crate) fn publish(&self, path: &[NodeId]) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        let len = path.len().min(MAX_UNITS);
        for (slot, id) in self.ids.iter().zip(&path[..len]) {
            slot.store(id.0, Ordering::Relaxed);
        }
        self.len.store(len, Ordering::Relaxed);
        self.seq.store(s.wrapping_add(2), Ordering::Release);
    }

    /// Copy the path into `out` if it changed since `seen`. Never blocks.
    fn read_into(&self, seen: &mut u64, out: &mut [NodeId; MAX_UNITS], len: &mut usize) -> bool {
        let s1 = self.seq.load(Ordering::Acquire);
        if s1 % 2 == 1 || s1 == *seen {
            return false;
        }
        let n = self.len.load(Ordering::Relaxed).min(MAX_UNITS);
        for (o, slot) in out.iter_mut().zip(&self.ids[..n]) {
            *o = NodeId(slot.load(Ordering::Relaxed));
        }
        fence(Ordering::Acquire);
        if self.seq.load(Ordering::Relaxed) != s1 {
            return false;
        }
        *seen = s1;
        *len = n;
        true
    }
}

impl Default for PathMailbox {
    fn default() -> Self { Self::new() }
}

/// Serial chain of effect units driven once per quantum.
/// Owned by whichever thread renders audio; everything else talks to it
/// through channels and the path mailbox.
pub struct Renderer {
    units: Vec<Box<EffectUnit>>,
    /// Attached but off the path.
    bypassed: Vec<Box<EffectUnit>>,
    commands: Receiver<GraphCommand>,
    retired: Sender<Box<EffectUnit>>,
    mailbox: Arc<PathMailbox>,
    order: [NodeId; MAX_UNITS],
    order_len: usize,
    seen: u64,
    input: AudioBlock,
    output: AudioBlock,
    front: AudioBlock,
    back: AudioBlock,
    cursor: usize,
    frames: u64,
    channels: usize,
    sample_rate: f32,
}

impl Renderer {
    pub(crate) fn new(
        channels: usize,
        sample_rate: f32,
        commands: Receiver<GraphCommand>,
        retired: Sender<Box<EffectUnit>>,
        mailbox: Arc<PathMailbox>,
    ) -> Self {
        Self {
            units: Vec::with_capacity(MAX_UNITS),
            bypassed: Vec::with_capacity(MAX_UNITS),
            commands,
            retired,
            mailbox,
            order: [NodeId(0); MAX_UNITS],
            order_len: 0,
            seen: 0,
            input: AudioBlock::new(channels),
            output: AudioBlock::new(channels),
            front: AudioBlock::new(channels),
            back: AudioBlock::new(channels),
            cursor: BLOCK_SIZE,
            frames: 0,
            channels,
            sample_rate,
        }
    }

    pub fn channels(&self) -> usize { self.channels }
    pub fn sample_rate(&self) -> f32 { self.sample_rate }
    pub fn frames_rendered(&self) -> u64 { self.frames }

    /// Ids of the live units, in signal order.
    pub fn live_units(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.units.iter().map(|u| u.id())
    }

    /// Ids of units held on the audio thread but off the path.
    pub fn bypassed_units(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.bypassed.iter().map(|u| u.id())
    }

    /// Render exactly one quantum.
    pub fn render_quantum(&mut self, input: &AudioBlock, output: &mut AudioBlock) {
        self.input.copy_from(input);
        self.process();
        output.copy_from(&self.output);
    }

    /// Fill an interleaved buffer of any length, rendering whole quanta as
    /// needed. `capture` fills the input for each new quantum.
    pub fn render_interleaved(&mut self, out: &mut [f32], mut capture: impl FnMut(&mut AudioBlock)) {
        let channels = self.channels.max(1);
        for frame in out.chunks_mut(channels) {
            if self.cursor == BLOCK_SIZE {
                capture(&mut self.input);
                self.process();
                self.cursor = 0;
            }
            for (c, s) in frame.iter_mut().enumerate() {
                *s = if c < self.channels { self.output[c][self.cursor] } else { 0.0 };
            }
            self.cursor += 1;
        }
    }

    fn process(&mut self) {
        let arrived = self.apply_commands();
        let moved = self.mailbox.read_into(&mut self.seen, &mut self.order, &mut self.order_len);
        if arrived || moved {
            self.arrange();
        }

        self.front.copy_from(&self.input);
        let mut i = 0;
        while i < self.units.len() {
            if self.units[i].process(&self.front, &mut self.back) {
                std::mem::swap(&mut self.front, &mut self.back);
                i += 1;
            } else {
                let unit = self.units.remove(i);
                self.retire(unit);
            }
        }
        self.output.copy_from(&self.front);
        self.frames += BLOCK_SIZE as u64;
    }

    /// Returns whether any unit arrived.
    fn apply_commands(&mut self) -> bool {
        let mut arrived = false;
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                GraphCommand::Attach { unit } => {
                    if self.units.len() + self.bypassed.len() >= MAX_UNITS {
                        self.retire(unit);
                    } else {
                        self.bypassed.push(unit);
                        arrived = true;
                    }
                }
                GraphCommand::Release { id } => {
                    if let Some(pos) = self.units.iter().position(|u| u.id() == id) {
                        let unit = self.units.remove(pos);
                        self.retire(unit);
                    } else if let Some(pos) = self.bypassed.iter().position(|u| u.id() == id) {
                        let unit = self.bypassed.swap_remove(pos);
                        self.retire(unit);
                    }
                }
            }
        }
        arrived
    }

    /// Rebuild the live chain from the last published path. Both vectors
    /// hold at most `MAX_UNITS` units together, so nothing reallocates.
    fn arrange(&mut self) {
        while let Some(unit) = self.units.pop() {
            self.bypassed.push(unit);
        }
        for id in &self.order[..self.order_len] {
            if let Some(pos) = self.bypassed.iter().position(|u| u.id() == *id) {
                let unit = self.bypassed.swap_remove(pos);
                self.units.push(unit);
            }
        }
    }

    fn retire(&self, unit: Box<EffectUnit>) {
        // Full channel: dropping here beats blocking the callback.
        if let Err(err) = self.retired.try_send(unit) {
            drop(err.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(mailbox: &PathMailbox, seen: &mut u64) -> Option<Vec<NodeId>> {
        let mut out = [NodeId(0); MAX_UNITS];
        let mut len = 0;
        mailbox.read_into(seen, &mut out, &mut len).then(|| out[..len].to_vec())
    }

    #[test]
    fn mailbox_keeps_only_the_last_path() {
        let mailbox = PathMailbox::new();
        let mut seen = 0;
        assert_eq!(read(&mailbox, &mut seen), None);

        for i in 0..600u64 {
            mailbox.publish(&[NodeId(1 + i % 2), NodeId(2 - i % 2)]);
        }
        assert_eq!(read(&mailbox, &mut seen), Some(vec![NodeId(2), NodeId(1)]));
        assert_eq!(read(&mailbox, &mut seen), None, "unchanged since last read");

        mailbox.publish(&[]);
        assert_eq!(read(&mailbox, &mut seen), Some(vec![]));
    }

    #[test]
    fn mailbox_truncates_long_paths() {
        let mailbox = PathMailbox::new();
        let path: Vec<NodeId> = (0..MAX_UNITS as u64 + 5).map(NodeId).collect();
        mailbox.publish(&path);
        let mut seen = 0;
        assert_eq!(read(&mailbox, &mut seen).map(|p| p.len()), Some(MAX_UNITS));
    }

    #[test]
    fn mailbox_reads_across_threads() {
        let mailbox = Arc::new(PathMailbox::new());
        let writer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                for i in 0..2_000u64 {
                    mailbox.publish(&[NodeId(i), NodeId(i + 1), NodeId(i + 2)]);
                }
            })
        };
        let mut seen = 0;
        let mut last = None;
        while !writer.is_finished() || last.as_ref().map(|p: &Vec<NodeId>| p[0]) != Some(NodeId(1_999)) {
            if let Some(path) = read(&mailbox, &mut seen) {
                // never a torn mix of two publishes
                assert_eq!(path[1].0, path[0].0 + 1);
                assert_eq!(path[2].0, path[0].0 + 2);
                last = Some(path);
            }
        }
        writer.join().unwrap();
    }
}
