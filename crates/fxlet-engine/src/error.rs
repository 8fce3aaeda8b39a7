use thiserror::Error;

use crate::graph::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("processor \"{name}\" is already registered")]
    RegistrationConflict { name: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("scope line {line}: {kind}")]
pub struct ScopeError {
    pub line: usize,
    pub kind: ScopeErrorKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeErrorKind {
    #[error("unexpected statement `{0}`")]
    UnexpectedStatement(String),
    #[error("class `{class}` extends undefined `{base}`")]
    UndefinedBase { class: String, base: String },
    #[error("`{0}` is defined twice")]
    DuplicateDefinition(String),
    #[error("register names undeclared processor class `{0}`")]
    UndeclaredClass(String),
    #[error("no native implementation for class `{0}`")]
    MissingImplementation(String),
    #[error("processor \"{0}\" is installed twice")]
    DuplicateInstall(String),
    #[error("unterminated processor body")]
    UnterminatedBody,
}

/// Failures surfaced through an effect node's readiness handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("failed to install processor scope: {0}")]
    ModuleLoadFailure(String),
    #[error("no processor named \"{0}\" is installed")]
    UnknownProcessor(String),
    #[error("effect has no parameter named \"{0}\"")]
    UnknownParameter(String),
    #[error("node was disposed before it became ready")]
    Disposed,
    #[error("could not start node initialisation: {0}")]
    ThreadSpawn(String),
}

impl From<ScopeError> for BridgeError {
    fn from(e: ScopeError) -> Self {
        BridgeError::ModuleLoadFailure(e.to_string())
    }
}

/// A processor panicked inside its audio callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("processor on node {node} failed: {message}")]
pub struct ProcessorError {
    pub node: NodeId,
    pub message: String,
}
