//! Control-side lifecycle of one effect: install, construct, bind, route,
//! dispose.
//!
//! An [`EffectNode`] is usable the moment it is created. Parameter writes and
//! messages made before the processor exists are kept as shadow values and a
//! message queue, then handed over once the init thread has built the unit.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::context::{AudioContext, WorkletNode};
use crate::dsp::crossfade::{Crossfade, WET};
use crate::error::{BridgeError, ProcessorError};
use crate::graph::{EffectUnit, NodeId, Routing};
use crate::param::AutomationParam;
use crate::processor::Message;

/// Ramp used by the typed setters.
pub const DEFAULT_RAMP: Duration = Duration::from_millis(50);

macro_rules! lifecycle {
    ($debug:expr, $($arg:tt)+) => {
        if $debug { tracing::debug!($($arg)+) } else { tracing::trace!($($arg)+) }
    };
}

/* ---------- descriptors ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bits,
    Seconds,
    NormalRange,
    Index,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Bits => "bits",
            Unit::Seconds => "s",
            Unit::NormalRange | Unit::Index => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Bound to a processor automation target.
    Automated,
    /// Sent as `Message::Param` whenever it changes.
    Message,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub unit: Unit,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub binding: Binding,
}

impl ParamSpec {
    pub const fn automated(name: &'static str, unit: Unit, min: f32, max: f32, default: f32) -> Self {
        Self { name, unit, min, max, default, binding: Binding::Automated }
    }

    pub const fn message(name: &'static str, unit: Unit, min: f32, max: f32, default: f32) -> Self {
        Self { name, unit, min, max, default, binding: Binding::Message }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() { self.default } else { value.clamp(self.min, self.max) }
    }
}

impl fmt::Display for ParamSpec {
    /// `name = default [min, max] unit`, with `(message)` for unautomated params.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} [{}, {}]", self.name, self.default, self.min, self.max)?;
        let symbol = self.unit.symbol();
        if !symbol.is_empty() {
            write!(f, " {symbol}")?;
        }
        if self.binding == Binding::Message {
            f.write_str(" (message)")?;
        }
        Ok(())
    }
}

/// Wet/dry mix of every crossfaded effect.
pub const WET_SPEC: ParamSpec = ParamSpec::automated("wet", Unit::NormalRange, 0.0, 1.0, 1.0);

/// Everything that distinguishes one effect from another.
#[derive(Debug)]
pub struct EffectDescriptor {
    pub processor: &'static str,
    pub params: &'static [ParamSpec],
    /// Mix the processor output with the dry input; otherwise the processor
    /// output is the node output.
    pub crossfade: bool,
}

impl EffectDescriptor {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        if self.crossfade && name == WET_SPEC.name {
            return Some(&WET_SPEC);
        }
        self.params.iter().find(|p| p.name == name)
    }
}

/// Construction options shared by every effect.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub values: Vec<(String, f32)>,
    pub wet: f32,
    /// Send `Message::Start` as soon as the processor exists.
    pub autostart: bool,
    /// Seed for processors that draw random numbers.
    pub seed: Option<u64>,
    pub debug: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self { values: Vec::new(), wet: 1.0, autostart: false, seed: None, debug: false }
    }
}

impl NodeOptions {
    pub fn new() -> Self { Self::default() }

    pub fn param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.values.push((name.into(), value));
        self
    }

    pub fn wet(mut self, wet: f32) -> Self {
        self.wet = wet;
        self
    }

    pub fn autostart(mut self, on: bool) -> Self {
        self.autostart = on;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }
}

/* ---------- parameter cells ---------- */

/// Control-side value of one parameter. Moves from `Shadow` to `Bound` (or
/// `Inert` when the processor lacks the target) exactly once.
#[derive(Debug, Clone)]
pub enum ParamCell {
    Shadow(f32),
    Bound(Arc<AutomationParam>),
    Inert(f32),
}

impl ParamCell {
    pub fn value(&self) -> f32 {
        match self {
            ParamCell::Shadow(v) | ParamCell::Inert(v) => *v,
            ParamCell::Bound(p) => p.target(),
        }
    }

    pub fn is_bound(&self) -> bool { matches!(self, ParamCell::Bound(_)) }

    /// The shadow value becomes the target's starting value, unramped.
    /// Returns `false` if the cell was already resolved.
    pub fn bind(&mut self, target: Option<Arc<AutomationParam>>) -> bool {
        let ParamCell::Shadow(value) = *self else { return false };
        *self = match target {
            Some(t) => {
                t.set_value(value);
                ParamCell::Bound(t)
            }
            None => ParamCell::Inert(value),
        };
        true
    }

    /// Returns `false` for inert cells, which ignore writes.
    pub fn write(&mut self, value: f32, ramp_frames: u32) -> bool {
        match self {
            ParamCell::Shadow(v) => *v = value,
            ParamCell::Bound(p) if ramp_frames == 0 => p.set_value(value),
            ParamCell::Bound(p) => p.ramp_to(value, ramp_frames),
            ParamCell::Inert(_) => return false,
        }
        true
    }
}

/* ---------- readiness ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Ready,
    Failed(BridgeError),
}

/// Resolves once the node's processor is built and bound, or fails.
#[derive(Clone)]
pub struct Ready {
    inner: Arc<(Mutex<ReadyState>, Condvar)>,
}

impl Ready {
    fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(ReadyState::Pending), Condvar::new())) }
    }

    fn resolve(&self, result: Result<(), BridgeError>) {
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        if *state == ReadyState::Pending {
            *state = match result {
                Ok(()) => ReadyState::Ready,
                Err(e) => ReadyState::Failed(e),
            };
            cv.notify_all();
        }
    }

    pub fn status(&self) -> ReadyState { self.inner.0.lock().clone() }

    pub fn wait(&self) -> Result<(), BridgeError> {
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        while *state == ReadyState::Pending {
            cv.wait(&mut state);
        }
        outcome(&state)
    }

    /// `None` if still pending after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), BridgeError>> {
        let deadline = Instant::now() + timeout;
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        while *state == ReadyState::Pending {
            if cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match *state {
            ReadyState::Pending => None,
            ref s => Some(outcome(s)),
        }
    }
}

fn outcome(state: &ReadyState) -> Result<(), BridgeError> {
    match state {
        ReadyState::Failed(e) => Err(e.clone()),
        _ => Ok(()),
    }
}

/* ---------- node ---------- */

struct NodeState {
    params: Vec<(&'static ParamSpec, ParamCell)>,
    wet: Option<ParamCell>,
    port: Option<Sender<Message>>,
    queued: Vec<Message>,
}

struct NodeShared {
    id: NodeId,
    descriptor: &'static EffectDescriptor,
    context: AudioContext,
    state: Mutex<NodeState>,
    ready: Ready,
    disposed: AtomicBool,
    seed: Option<u64>,
    debug: bool,
}

/// One effect in an [`AudioContext`], driven by an [`EffectDescriptor`].
/// Dropping the node disposes it.
pub struct EffectNode {
    shared: Arc<NodeShared>,
}

impl EffectNode {
    pub fn new(
        context: &AudioContext,
        descriptor: &'static EffectDescriptor,
        options: NodeOptions,
    ) -> Result<Self, BridgeError> {
        let mut params: Vec<(&'static ParamSpec, ParamCell)> =
            descriptor.params.iter().map(|s| (s, ParamCell::Shadow(s.default))).collect();
        let mut wet = descriptor.crossfade.then(|| ParamCell::Shadow(WET_SPEC.clamp(options.wet)));

        for (name, value) in &options.values {
            if let (Some(cell), true) = (wet.as_mut(), name.as_str() == WET_SPEC.name) {
                cell.write(WET_SPEC.clamp(*value), 0);
                continue;
            }
            let Some((spec, cell)) = params.iter_mut().find(|(s, _)| s.name == name.as_str()) else {
                return Err(BridgeError::UnknownParameter(name.clone()));
            };
            cell.write(spec.clamp(*value), 0);
        }

        let debug = options.debug || context.options().debug;
        let id = context.register_node();
        let shared = Arc::new(NodeShared {
            id,
            descriptor,
            context: context.clone(),
            state: Mutex::new(NodeState {
                params,
                wet,
                port: None,
                queued: if options.autostart { vec![Message::Start] } else { Vec::new() },
            }),
            ready: Ready::new(),
            disposed: AtomicBool::new(false),
            seed: options.seed,
            debug,
        });

        let worker = shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("fxlet-node-{}", id.0))
            .spawn(move || worker.initialise());
        if let Err(e) = spawned {
            shared.context.abandon(id);
            shared.ready.resolve(Err(BridgeError::ThreadSpawn(e.to_string())));
        }
        lifecycle!(debug, node = %id, processor = descriptor.processor, "effect node created");
        Ok(Self { shared })
    }

    pub fn id(&self) -> NodeId { self.shared.id }
    pub fn processor_name(&self) -> &'static str { self.shared.descriptor.processor }
    pub fn descriptor(&self) -> &'static EffectDescriptor { self.shared.descriptor }
    pub fn context(&self) -> &AudioContext { &self.shared.context }
    pub fn ready(&self) -> Ready { self.shared.ready.clone() }
    pub fn is_ready(&self) -> bool { self.shared.ready.status() == ReadyState::Ready }
    pub fn is_disposed(&self) -> bool { self.shared.disposed.load(Ordering::Acquire) }

    /// Jump to `value` (clamped to the parameter's range).
    pub fn set(&self, name: &str, value: f32) -> Result<(), BridgeError> {
        self.write(name, value, 0)
    }

    /// Ramp linearly to `value` over `duration`. Before readiness this only
    /// updates the shadow value.
    pub fn ramp(&self, name: &str, value: f32, duration: Duration) -> Result<(), BridgeError> {
        let frames = (duration.as_secs_f32() * self.shared.context.sample_rate()).round() as u32;
        self.write(name, value, frames)
    }

    /// Current value, or the ramp target while ramping.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.cell(name).map(|c| c.value())
    }

    pub fn cell(&self, name: &str) -> Option<ParamCell> {
        let state = self.shared.state.lock();
        if name == WET_SPEC.name {
            if let Some(wet) = &state.wet {
                return Some(wet.clone());
            }
        }
        state.params.iter().find(|(s, _)| s.name == name).map(|(_, c)| c.clone())
    }

    /// Send a discrete message; queued until the processor exists.
    pub fn post(&self, msg: Message) {
        let mut guard = self.shared.state.lock();
        if self.is_disposed() {
            return;
        }
        let state = &mut *guard;
        match &state.port {
            Some(port) => {
                if let Err(TrySendError::Full(msg)) = port.try_send(msg) {
                    warn!(node = %self.shared.id, "message queue full, dropped {msg:?}");
                }
            }
            None => state.queued.push(msg),
        }
    }

    pub fn connect(&self, next: &EffectNode) -> &Self {
        self.shared.context.connect(self.shared.id, next.shared.id);
        self
    }

    pub fn disconnect(&self) -> &Self {
        self.shared.context.disconnect(self.shared.id);
        self
    }

    pub fn to_destination(&self) -> &Self {
        self.shared.context.to_destination(self.shared.id);
        self
    }

    /// Called from the context's event thread when the processor panics.
    pub fn on_processor_error(&self, handler: impl Fn(&ProcessorError) + Send + Sync + 'static) {
        self.shared.context.set_error_handler(self.shared.id, Arc::new(handler));
    }

    /// Leave the graph and tell the processor to stop. Idempotent; the
    /// installed scope stays in place for other nodes.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = shared.state.lock();
        state.queued.clear();
        if let Some(port) = state.port.take() {
            // the unit is released by graph command either way
            let _ = port.try_send(Message::Dispose);
        }
        drop(state);
        shared.context.dispose_node(shared.id);
        lifecycle!(shared.debug, node = %shared.id, "effect node disposed");
    }

    fn write(&self, name: &str, value: f32, frames: u32) -> Result<(), BridgeError> {
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        if self.is_disposed() {
            return Ok(());
        }
        let state = &mut *guard;
        if name == WET_SPEC.name {
            if let Some(cell) = state.wet.as_mut() {
                cell.write(WET_SPEC.clamp(value), frames);
                return Ok(());
            }
        }
        let Some((spec, cell)) = state.params.iter_mut().find(|(s, _)| s.name == name) else {
            return Err(BridgeError::UnknownParameter(name.to_string()));
        };
        let value = spec.clamp(value);
        match spec.binding {
            Binding::Automated => {
                if !cell.write(value, frames) {
                    trace!(node = %shared.id, param = name, "write to inert parameter ignored");
                }
            }
            Binding::Message => {
                cell.write(value, 0);
                if let Some(port) = &state.port {
                    if port.try_send(Message::Param { name: spec.name, value }).is_err() {
                        warn!(node = %shared.id, param = name, "message queue full, update dropped");
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for EffectNode {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl NodeShared {
    fn initialise(&self) {
        let result = self
            .context
            .create_node(self.id, self.descriptor.processor, self.seed)
            .and_then(|node| self.on_ready(node));
        match &result {
            Ok(()) => lifecycle!(self.debug, node = %self.id, "effect node ready"),
            Err(e) => {
                warn!(node = %self.id, processor = self.descriptor.processor, "effect node failed: {e}");
                self.context.abandon(self.id);
            }
        }
        self.ready.resolve(result);
    }

    /// Wire the unit, bind parameters, flush queued messages and hand the
    /// unit to the graph.
    fn on_ready(&self, node: WorkletNode) -> Result<(), BridgeError> {
        let mut guard = self.state.lock();
        if self.disposed.load(Ordering::Acquire) {
            return Err(BridgeError::Disposed);
        }
        let state = &mut *guard;

        let mut outbox = Vec::new();
        for (spec, cell) in state.params.iter_mut() {
            match spec.binding {
                Binding::Automated => {
                    let target = node.parameter(spec.name);
                    if target.is_none() {
                        warn!(
                            node = %self.id,
                            processor = self.descriptor.processor,
                            param = spec.name,
                            "ParameterBindingMissing: no automation target, parameter is inert"
                        );
                    }
                    cell.bind(target);
                }
                Binding::Message => outbox.push(Message::Param { name: spec.name, value: cell.value() }),
            }
        }

        let routing = match state.wet.as_mut() {
            Some(cell) => {
                let fade = Arc::new(AutomationParam::new(WET));
                cell.bind(Some(fade.clone()));
                Routing::Crossfade(Crossfade::new(fade))
            }
            None => Routing::WetOnly,
        };

        for msg in outbox.into_iter().chain(state.queued.drain(..)) {
            if node.port.try_send(msg).is_err() {
                warn!(node = %self.id, "message queue full, dropped {msg:?}");
            }
        }
        state.port = Some(node.port.clone());

        let unit = EffectUnit::new(node.host, routing, self.context.channels());
        self.context.install_unit(Box::new(unit));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: crate::param::ParamDescriptor = crate::param::ParamDescriptor::k_rate("level", 0.0, 0.0, 1.0);

    #[test]
    fn shadow_binds_once() {
        let target = Arc::new(AutomationParam::new(LEVEL));
        let mut cell = ParamCell::Shadow(0.75);
        assert!(cell.bind(Some(target.clone())));
        assert!(cell.is_bound());
        assert_eq!(target.target(), 0.75);
        assert!(!cell.bind(None), "binding is one-way");
        assert!(cell.is_bound());
    }

    #[test]
    fn missing_target_makes_cell_inert() {
        let mut cell = ParamCell::Shadow(0.2);
        cell.bind(None);
        assert!(!cell.write(0.9, 0));
        assert_eq!(cell.value(), 0.2);
    }

    #[test]
    fn bound_writes_ramp() {
        let target = Arc::new(AutomationParam::new(LEVEL));
        let mut cell = ParamCell::Shadow(0.0);
        cell.bind(Some(target.clone()));
        assert!(cell.write(0.5, 2_400));
        assert_eq!(cell.value(), 0.5);
    }

    #[test]
    fn spec_clamps_and_replaces_nan() {
        let spec = ParamSpec::automated("bits", Unit::Bits, 1.0, 16.0, 4.0);
        assert_eq!(spec.clamp(40.0), 16.0);
        assert_eq!(spec.clamp(f32::NAN), 4.0);
    }

    #[test]
    fn spec_display_carries_the_unit() {
        let bits = ParamSpec::automated("bits", Unit::Bits, 1.0, 16.0, 4.0);
        assert_eq!(bits.to_string(), "bits = 4 [1, 16] bits");
        let time = ParamSpec::automated("delayTime", Unit::Seconds, 0.0, 2.0, 0.5);
        assert_eq!(time.to_string(), "delayTime = 0.5 [0, 2] s");
        let amp = ParamSpec::message("amplitude", Unit::NormalRange, 0.0, 1.0, 1.0);
        assert_eq!(amp.to_string(), "amplitude = 1 [0, 1] (message)");
    }

    #[test]
    fn ready_resolves_once() {
        let ready = Ready::new();
        assert_eq!(ready.wait_timeout(Duration::from_millis(1)), None);
        ready.resolve(Err(BridgeError::Disposed));
        ready.resolve(Ok(()));
        assert_eq!(ready.status(), ReadyState::Failed(BridgeError::Disposed));
        assert_eq!(ready.wait(), Err(BridgeError::Disposed));
    }

    #[test]
    fn ready_wakes_waiters() {
        let ready = Ready::new();
        let waiter = {
            let ready = ready.clone();
            thread::spawn(move || ready.wait())
        };
        ready.resolve(Ok(()));
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
