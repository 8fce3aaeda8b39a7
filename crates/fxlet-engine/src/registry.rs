//! Processor registry and the scope source it produces.
//!
//! Processors are collected before any [`AudioContext`](crate::context::AudioContext)
//! exists. Each context compiles the registry's scope source exactly once when
//! the first node asks for it; after that the set of constructible processors
//! is frozen for that context.
//!
//! Scope source is line oriented:
//!
//! ```text
//! base SampleProcessor
//!
//! utility RingBuffer
//!
//! processor BitCrusher extends SampleProcessor {
//!     param bits = 8 [1, 16] k-rate
//! }
//!
//! register "bit-crusher" BitCrusher
//! ```
//!
//! Statements are checked in textual order, so a class must be declared
//! before anything extends or registers it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{RegistryError, ScopeError, ScopeErrorKind};
use crate::param::ParamDescriptor;
use crate::processor::{ProcessorOptions, SampleProcessor};

pub const SAMPLE_PROCESSOR_BASE: &str = "base SampleProcessor";
pub const RING_BUFFER_UTILITY: &str = "utility RingBuffer";

pub type Constructor = fn(&ProcessorOptions) -> Box<dyn SampleProcessor>;

/// Native implementation behind a scope `processor` declaration.
pub struct ProcessorClass {
    pub name: &'static str,
    pub extends: &'static str,
    /// 0 for generators that ignore upstream audio.
    pub inputs: usize,
    pub parameters: &'static [ParamDescriptor],
    pub construct: Constructor,
}

impl ProcessorClass {
    /// Scope-source declaration for this class.
    pub fn declaration(&self) -> String {
        let mut out = format!("processor {} extends {} {{\n", self.name, self.extends);
        for p in self.parameters {
            out.push_str(&format!(
                "    param {} = {} [{}, {}] {}\n",
                p.name, p.default, p.min, p.max, p.rate.as_str()
            ));
        }
        out.push('}');
        out
    }

    pub fn parameter(&self, name: &str) -> Option<&'static ParamDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for ProcessorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorClass")
            .field("name", &self.name)
            .field("extends", &self.extends)
            .field("inputs", &self.inputs)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Ordered collection of scope source plus the native classes it refers to.
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    base_classes: Vec<String>,
    utilities: Vec<String>,
    processors: Vec<String>,
    registrations: Vec<(String, &'static ProcessorClass)>,
}

impl ScopeRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry with the bundled base class, ring buffer utility and the
    /// bit crusher, delay and noise generator processors.
    pub fn builtin() -> Self {
        use crate::dsp::{bit_crusher, delay, noise};

        let mut reg = Self::new();
        reg.add_base_class(SAMPLE_PROCESSOR_BASE);
        reg.add_utility(RING_BUFFER_UTILITY);
        let builtins = [
            (bit_crusher::PROCESSOR_NAME, &bit_crusher::CLASS),
            (delay::PROCESSOR_NAME, &delay::CLASS),
            (noise::PROCESSOR_NAME, &noise::CLASS),
        ];
        for (name, class) in builtins {
            let registered = reg.register_processor(name, class);
            debug_assert!(registered.is_ok(), "{registered:?}");
        }
        reg
    }

    pub fn add_base_class(&mut self, src: impl Into<String>) {
        push_unique(&mut self.base_classes, src.into());
    }

    pub fn add_utility(&mut self, src: impl Into<String>) {
        push_unique(&mut self.utilities, src.into());
    }

    /// Raw processor declaration without a native registration.
    pub fn add_processor_impl(&mut self, src: impl Into<String>) {
        push_unique(&mut self.processors, src.into());
    }

    pub fn register_processor(
        &mut self,
        name: &str,
        class: &'static ProcessorClass,
    ) -> Result<(), RegistryError> {
        if self.is_registered(name) {
            return Err(RegistryError::RegistrationConflict { name: name.to_string() });
        }
        push_unique(&mut self.processors, class.declaration());
        self.registrations.push((name.to_string(), class));
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.iter().any(|(n, _)| n == name)
    }

    /// Registered processor names in registration order.
    pub fn registered(&self) -> Vec<&str> {
        self.registrations.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn reset(&mut self) {
        self.base_classes.clear();
        self.utilities.clear();
        self.processors.clear();
        self.registrations.clear();
    }

    /// Base classes, utilities, processor declarations, registrations, in that
    /// order regardless of the order they were added.
    pub fn global_scope_source(&self, debug: bool) -> String {
        let mut parts: Vec<String> = Vec::new();
        if debug {
            parts.push(format!(
                "# fxlet global scope: {} processor(s)\n# {}",
                self.registrations.len(),
                self.registered().join(", ")
            ));
        }
        parts.extend(self.base_classes.iter().cloned());
        parts.extend(self.utilities.iter().cloned());
        parts.extend(self.processors.iter().cloned());
        parts.extend(
            self.registrations
                .iter()
                .map(|(name, class)| format!("register \"{}\" {}", name, class.name)),
        );
        parts.join("\n\n")
    }

    /// Native classes by class name, for [`compile`].
    pub fn classes(&self) -> HashMap<&'static str, &'static ProcessorClass> {
        self.registrations.iter().map(|(_, c)| (c.name, *c)).collect()
    }
}

fn push_unique(list: &mut Vec<String>, src: String) {
    if !list.contains(&src) {
        list.push(src);
    }
}

/* ---------- compiled scope ---------- */

/// Processors constructible in one context once its scope is installed.
#[derive(Debug, Clone, Default)]
pub struct InstalledScope {
    processors: Vec<(String, &'static ProcessorClass)>,
}

impl InstalledScope {
    pub fn get(&self, name: &str) -> Option<&'static ProcessorClass> {
        self.processors.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize { self.processors.len() }
    pub fn is_empty(&self) -> bool { self.processors.is_empty() }
}

/// Check `source` statement by statement and bind each `register` to its
/// native class.
pub fn compile(
    source: &str,
    classes: &HashMap<&'static str, &'static ProcessorClass>,
) -> Result<InstalledScope, ScopeError> {
    let mut bases: HashSet<&str> = HashSet::new();
    let mut utilities: HashSet<&str> = HashSet::new();
    let mut declared: HashSet<&str> = HashSet::new();
    let mut scope = InstalledScope::default();
    let mut body_start: Option<usize> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        let fail = |kind| Err(ScopeError { line, kind });
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        if body_start.is_some() {
            if text == "}" {
                body_start = None;
            } else if !text.starts_with("param ") {
                return fail(ScopeErrorKind::UnexpectedStatement(text.to_string()));
            }
            continue;
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        match words.as_slice() {
            ["base", name] => {
                if !bases.insert(*name) {
                    return fail(ScopeErrorKind::DuplicateDefinition(name.to_string()));
                }
            }
            ["utility", name] => {
                if !utilities.insert(*name) {
                    return fail(ScopeErrorKind::DuplicateDefinition(name.to_string()));
                }
            }
            ["processor", name, "extends", base, "{"] => {
                if !bases.contains(*base) && !declared.contains(*base) {
                    return fail(ScopeErrorKind::UndefinedBase {
                        class: name.to_string(),
                        base: base.to_string(),
                    });
                }
                if !declared.insert(*name) {
                    return fail(ScopeErrorKind::DuplicateDefinition(name.to_string()));
                }
                body_start = Some(line);
            }
            ["register", quoted, class] if quoted.len() > 2 && quoted.starts_with('"') && quoted.ends_with('"') => {
                let name = &quoted[1..quoted.len() - 1];
                if !declared.contains(*class) {
                    return fail(ScopeErrorKind::UndeclaredClass(class.to_string()));
                }
                let Some(native) = classes.get(*class) else {
                    return fail(ScopeErrorKind::MissingImplementation(class.to_string()));
                };
                if scope.get(name).is_some() {
                    return fail(ScopeErrorKind::DuplicateInstall(name.to_string()));
                }
                scope.processors.push((name.to_string(), *native));
            }
            _ => return fail(ScopeErrorKind::UnexpectedStatement(text.to_string())),
        }
    }

    if let Some(line) = body_start {
        return Err(ScopeError { line, kind: ScopeErrorKind::UnterminatedBody });
    }
    Ok(scope)
}
