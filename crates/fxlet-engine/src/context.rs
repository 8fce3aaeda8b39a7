//! Control-thread side of an audio graph.
//!
//! An [`AudioContext`] owns the installed processor scope, hands out node
//! ids, mirrors the serial signal path and ships graph edits to the
//! [`Renderer`] over a bounded channel. Units removed from the audio thread
//! come back on a second channel so they are always dropped here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, ProcessorError};
use crate::graph::{EffectUnit, GraphCommand, NodeId, PathMailbox, Renderer, MAX_UNITS};
use crate::param::{AutomationParam, ParamCursor};
use crate::processor::{Message, ProcessorHost, ProcessorOptions};
use crate::registry::{compile, InstalledScope, ProcessorClass, ScopeRegistry};

const COMMAND_CAPACITY: usize = 1024;
const PORT_CAPACITY: usize = 64;
const ERROR_CAPACITY: usize = 64;

pub type ErrorHandler = Arc<dyn Fn(&ProcessorError) + Send + Sync>;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub sample_rate: f32,
    pub channels: usize,
    /// Prefix the installed scope with a header and log node lifecycles at debug.
    pub debug: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { sample_rate: 48_000.0, channels: 2, debug: false }
    }
}

/// A freshly constructed processor, not yet attached anywhere.
pub struct WorkletNode {
    pub id: NodeId,
    pub class: &'static ProcessorClass,
    pub port: Sender<Message>,
    pub host: ProcessorHost,
    params: Vec<Arc<AutomationParam>>,
}

impl WorkletNode {
    /// Automation target for a declared processor parameter.
    pub fn parameter(&self, name: &str) -> Option<Arc<AutomationParam>> {
        self.params.iter().find(|p| p.name() == name).cloned()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Arc<AutomationParam>> {
        self.params.iter()
    }
}

enum Slot {
    /// Registered, processor not built yet.
    Pending,
    /// Built but still on the control thread.
    Parked(Box<EffectUnit>),
    /// Held by the renderer, live or bypassed depending on the path.
    Audio,
    /// Disposed while on the audio thread; `Release` not sent yet.
    Releasing,
    /// Disposed; waiting for the unit to come back or never to arrive.
    Disposed,
}

struct GraphState {
    path: Vec<NodeId>,
    published: Option<Vec<NodeId>>,
    slots: HashMap<NodeId, Slot>,
    /// Units sent with `Attach` and not yet returned.
    on_audio: usize,
    commands: Sender<GraphCommand>,
    retired: Receiver<Box<EffectUnit>>,
    mailbox: Arc<PathMailbox>,
}

impl GraphState {
    /// Bring the audio thread in line with `path`. Anything that could not be
    /// sent stays in its slot and is retried on the next call.
    fn reconcile(&mut self) {
        while let Ok(unit) = self.retired.try_recv() {
            self.on_audio = self.on_audio.saturating_sub(1);
            let id = unit.id();
            match self.slots.get_mut(&id) {
                Some(slot @ Slot::Audio) => *slot = Slot::Parked(unit),
                Some(_) => {
                    self.slots.remove(&id);
                    debug!(node = %id, "unit released");
                }
                None => {}
            }
        }

        let releasing: Vec<NodeId> =
            self.slots.iter().filter(|(_, s)| matches!(s, Slot::Releasing)).map(|(id, _)| *id).collect();
        for id in releasing {
            if self.send(GraphCommand::Release { id }).is_ok() {
                self.slots.insert(id, Slot::Disposed);
            }
        }

        for id in self.path.clone() {
            if !matches!(self.slots.get(&id), Some(Slot::Parked(_))) {
                continue;
            }
            if self.on_audio >= MAX_UNITS {
                warn!(node = %id, "renderer holds {MAX_UNITS} units; node stays bypassed");
                break;
            }
            let Some(Slot::Parked(unit)) = self.slots.insert(id, Slot::Audio) else { continue };
            match self.send(GraphCommand::Attach { unit }) {
                Ok(()) => self.on_audio += 1,
                Err(GraphCommand::Attach { unit }) => {
                    self.slots.insert(id, Slot::Parked(unit));
                }
                Err(_) => {}
            }
        }

        if self.published.as_ref() != Some(&self.path) {
            self.mailbox.publish(&self.path);
            self.published = Some(self.path.clone());
        }
    }

    fn send(&self, cmd: GraphCommand) -> Result<(), GraphCommand> {
        match self.commands.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                warn!("graph command queue full; is the renderer running?");
                Err(cmd)
            }
            Err(TrySendError::Disconnected(cmd)) => Err(cmd),
        }
    }

    fn is_disposed(&self, id: NodeId) -> bool {
        matches!(self.slots.get(&id), Some(Slot::Releasing | Slot::Disposed) | None)
    }
}

struct ContextInner {
    options: ContextOptions,
    registry: Arc<ScopeRegistry>,
    scope: Mutex<Option<Arc<InstalledScope>>>,
    installs: AtomicUsize,
    next_id: AtomicU64,
    graph: Mutex<GraphState>,
    errors: Sender<ProcessorError>,
    handlers: Arc<Mutex<HashMap<NodeId, ErrorHandler>>>,
}

/// Cheap to clone; every clone drives the same graph.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<ContextInner>,
}

impl AudioContext {
    /// Build a context and the renderer that plays its graph. The renderer
    /// belongs on whatever thread produces audio.
    pub fn new(options: ContextOptions, registry: Arc<ScopeRegistry>) -> (Self, Renderer) {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_CAPACITY);
        let (ret_tx, ret_rx) = bounded(MAX_UNITS * 2);
        let (err_tx, err_rx) = bounded(ERROR_CAPACITY);
        let handlers: Arc<Mutex<HashMap<NodeId, ErrorHandler>>> = Arc::default();
        let mailbox = Arc::new(PathMailbox::new());

        let dispatch_handlers = handlers.clone();
        let spawned = thread::Builder::new()
            .name("fxlet-events".into())
            .spawn(move || dispatch(err_rx, dispatch_handlers));
        if let Err(e) = spawned {
            error!("processor error dispatcher not started: {e}");
        }

        let ctx = Self {
            inner: Arc::new(ContextInner {
                options,
                registry,
                scope: Mutex::new(None),
                installs: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                graph: Mutex::new(GraphState {
                    path: Vec::new(),
                    published: None,
                    slots: HashMap::new(),
                    on_audio: 0,
                    commands: cmd_tx,
                    retired: ret_rx,
                    mailbox: mailbox.clone(),
                }),
                errors: err_tx,
                handlers,
            }),
        };
        let renderer = Renderer::new(options.channels, options.sample_rate, cmd_rx, ret_tx, mailbox);
        (ctx, renderer)
    }

    pub fn options(&self) -> &ContextOptions { &self.inner.options }
    pub fn sample_rate(&self) -> f32 { self.inner.options.sample_rate }
    pub fn channels(&self) -> usize { self.inner.options.channels }
    pub fn registry(&self) -> &Arc<ScopeRegistry> { &self.inner.registry }

    /* ---------- scope ---------- */

    /// Install the registry's scope source unless this context already has
    /// it. Concurrent callers wait on the same install; a failed install is
    /// not cached, so a later call tries again.
    pub fn ensure_installed(&self) -> Result<Arc<InstalledScope>, BridgeError> {
        let mut scope = self.inner.scope.lock();
        if let Some(installed) = scope.as_ref() {
            return Ok(installed.clone());
        }
        let source = self.inner.registry.global_scope_source(self.inner.options.debug);
        let installed = match compile(&source, &self.inner.registry.classes()) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!("processor scope rejected: {e}");
                return Err(e.into());
            }
        };
        self.inner.installs.fetch_add(1, Ordering::SeqCst);
        info!(processors = installed.len(), "processor scope installed");
        *scope = Some(installed.clone());
        Ok(installed)
    }

    pub fn is_installed(&self) -> bool { self.inner.scope.lock().is_some() }

    /// Successful installs so far; at most one per context.
    pub fn module_installs(&self) -> usize { self.inner.installs.load(Ordering::SeqCst) }

    /// Construct the processor registered under `name`.
    pub fn create_node(&self, id: NodeId, name: &str, seed: Option<u64>) -> Result<WorkletNode, BridgeError> {
        let scope = self.ensure_installed()?;
        let class = scope.get(name).ok_or_else(|| BridgeError::UnknownProcessor(name.to_string()))?;

        let params: Vec<Arc<AutomationParam>> =
            class.parameters.iter().map(|d| Arc::new(AutomationParam::new(*d))).collect();
        let cursors = params.iter().map(|p| ParamCursor::new(p.clone())).collect();
        let (port_tx, port_rx) = bounded(PORT_CAPACITY);
        let opts = ProcessorOptions {
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            seed,
        };
        let processor = (class.construct)(&opts);
        let host = ProcessorHost::new(
            id,
            processor,
            class.parameters,
            cursors,
            class.inputs > 0,
            port_rx,
            self.inner.errors.clone(),
        );
        debug!(node = %id, processor = name, "processor constructed");
        Ok(WorkletNode { id, class, port: port_tx, host, params })
    }

    /* ---------- graph ---------- */

    pub(crate) fn register_node(&self) -> NodeId {
        let id = NodeId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.graph.lock().slots.insert(id, Slot::Pending);
        id
    }

    /// Hand a built unit to the graph. Dropped if the node was disposed in
    /// the meantime.
    pub(crate) fn install_unit(&self, unit: Box<EffectUnit>) {
        let mut graph = self.inner.graph.lock();
        let id = unit.id();
        match graph.slots.get_mut(&id) {
            Some(slot @ Slot::Pending) => *slot = Slot::Parked(unit),
            _ => {
                graph.slots.remove(&id);
                return;
            }
        }
        graph.reconcile();
    }

    /// Drop the slot of a node whose processor will never arrive.
    pub(crate) fn abandon(&self, id: NodeId) {
        let mut graph = self.inner.graph.lock();
        if matches!(graph.slots.get(&id), Some(Slot::Pending | Slot::Disposed)) {
            graph.slots.remove(&id);
        }
        graph.path.retain(|n| *n != id);
        graph.reconcile();
    }

    /// Route `id` straight to the output, appending it to the path.
    pub(crate) fn to_destination(&self, id: NodeId) {
        let mut graph = self.inner.graph.lock();
        if graph.is_disposed(id) {
            return;
        }
        if !graph.path.contains(&id) {
            graph.path.push(id);
        }
        graph.reconcile();
    }

    /// Feed `from` into `to`; `to` moves to directly after `from`.
    pub(crate) fn connect(&self, from: NodeId, to: NodeId) {
        let mut graph = self.inner.graph.lock();
        if from == to || graph.is_disposed(from) || graph.is_disposed(to) {
            return;
        }
        if !graph.path.contains(&from) {
            graph.path.push(from);
        }
        graph.path.retain(|n| *n != to);
        let at = graph.path.iter().position(|n| *n == from).map_or(graph.path.len(), |p| p + 1);
        graph.path.insert(at, to);
        graph.reconcile();
    }

    pub(crate) fn disconnect(&self, id: NodeId) {
        let mut graph = self.inner.graph.lock();
        graph.path.retain(|n| *n != id);
        graph.reconcile();
    }

    /// Forget `id`. A unit on the audio thread is sent back with `Release`
    /// and dropped here once it arrives.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        self.inner.handlers.lock().remove(&id);
        let mut graph = self.inner.graph.lock();
        graph.path.retain(|n| *n != id);
        match graph.slots.get_mut(&id) {
            Some(Slot::Parked(_)) => {
                graph.slots.remove(&id);
            }
            Some(slot @ Slot::Audio) => *slot = Slot::Releasing,
            Some(slot @ Slot::Pending) => *slot = Slot::Disposed,
            _ => {}
        }
        graph.reconcile();
    }

    /// Signal path as the control thread sees it.
    pub fn path(&self) -> Vec<NodeId> { self.inner.graph.lock().path.clone() }

    /// Nodes still holding graph resources.
    pub fn node_count(&self) -> usize { self.inner.graph.lock().slots.len() }

    /// Drop units the renderer has finished with.
    pub fn collect_garbage(&self) {
        self.inner.graph.lock().reconcile();
    }

    /* ---------- errors ---------- */

    pub(crate) fn set_error_handler(&self, id: NodeId, handler: ErrorHandler) {
        self.inner.handlers.lock().insert(id, handler);
    }
}

fn dispatch(errors: Receiver<ProcessorError>, handlers: Arc<Mutex<HashMap<NodeId, ErrorHandler>>>) {
    for err in errors.iter() {
        error!(node = %err.node, "processor failed: {}", err.message);
        let handler = handlers.lock().get(&err.node).cloned();
        if let Some(handler) = handler {
            handler(&err);
        }
    }
}
