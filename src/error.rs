//! Error types, grouped by how far a failure is allowed to travel.
//!
//! - [`GraphError`]: structural problems with a graph description. Rejected
//!   before the live graph is touched.
//! - [`EngineError`]: the audio platform could not create, find or stream a
//!   primitive. Non-fatal for a single node, fatal for the engine itself.
//! - [`CompileError`] / [`EvalFault`]: the sandboxed expression language.
//! - [`PermissionError`]: capture devices that were refused or missing.
//! - [`UnitError`]: what a unit's `render` can report upward.

use thiserror::Error;

use crate::description::{EdgeId, NodeId};

/// Structural errors. Nothing in the live graph has changed when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Node ids are used as topic namespaces and must not contain `.`.
    #[error("invalid node id '{0}': ids must be non-empty, must not contain '.', and must not be reserved")]
    InvalidNodeId(String),

    /// A node with this id already exists.
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    /// An edge with this id already exists.
    #[error("duplicate edge id '{0}'")]
    DuplicateEdge(EdgeId),

    /// The node is not part of the graph.
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),

    /// The edge is not part of the graph.
    #[error("unknown edge '{0}'")]
    UnknownEdge(EdgeId),

    /// No unit is registered for this kind.
    #[error("unknown node kind '{0}'")]
    UnknownKind(String),

    /// The port is not declared by the node's kind.
    #[error("node '{node}' ({kind}) has no port '{port}'")]
    UnknownPort {
        /// Node the port was looked up on.
        node: NodeId,
        /// Kind of that node.
        kind: &'static str,
        /// The offending port name.
        port: String,
    },

    /// An edge into an audio input from a node that produces no audio.
    #[error("'{source_node}' ({source_kind}) cannot feed the audio input '{port}' of '{target}': it produces no audio")]
    InvalidAudioEdge {
        /// Source node of the rejected edge.
        source_node: NodeId,
        /// Kind of the source node.
        source_kind: &'static str,
        /// Target node of the rejected edge.
        target: NodeId,
        /// The audio input port.
        port: String,
    },

    /// The graph was stopped by a fatal error and must be reinitialized.
    #[error("graph is stopped: {0}")]
    Stopped(String),

    /// The description could not be parsed.
    #[error("malformed graph description: {0}")]
    Description(#[from] serde_json::Error),
}

/// Errors raised by the audio engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refuses to allocate more primitives.
    #[error("primitive budget exhausted ({limit} primitives)")]
    Exhausted {
        /// The configured budget.
        limit: usize,
    },

    /// The primitive id does not exist (already released or never created).
    #[error("unknown primitive {0:?}")]
    UnknownPrimitive(crate::node::PrimitiveId),

    /// No output device could be opened.
    #[error("no audio output device available")]
    NoOutputDevice,

    /// The device stream failed to build or start.
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Errors produced while compiling an expression or a worklet source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The tokenizer hit a character it does not understand.
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar {
        /// The character.
        ch: char,
        /// Byte offset in the source.
        pos: usize,
    },

    /// The parser found a token where it expected something else.
    #[error("unexpected {found} at {pos}, expected {expected}")]
    UnexpectedToken {
        /// Description of what was found.
        found: String,
        /// Description of what was expected.
        expected: &'static str,
        /// Byte offset in the source.
        pos: usize,
    },

    /// A name that is neither a bound variable nor a constant.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A call to a function outside the fixed function set.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A known function called with the wrong number of arguments.
    #[error("function '{name}' takes {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        name: &'static str,
        /// Expected argument count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// Expression nesting beyond what the compiler accepts.
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),

    /// Filter coefficients that cannot be realized.
    #[error("invalid coefficients: {0}")]
    Coefficients(String),
}

/// A failure while evaluating a compiled expression.
///
/// Carried downstream as [`Payload::Error`](crate::router::Payload::Error) so
/// consumers can tell a failed evaluation from a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalFault {
    /// The expression could not be compiled in the first place.
    #[error("expression does not compile: {0}")]
    Compile(#[from] CompileError),

    /// A variable was not supplied at evaluation time.
    #[error("variable '{0}' is not bound")]
    Unbound(String),

    /// The result was NaN or infinite.
    #[error("expression produced a non-finite result")]
    NonFinite,

    /// The incoming payload carried no usable number.
    #[error("payload carries no numeric value")]
    NoValue,
}

/// Access to a capture device was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PermissionError {
    /// The user or the platform denied access.
    #[error("capture permission denied")]
    Denied,

    /// No capture device exists.
    #[error("no capture device available")]
    NoDevice,

    /// The request did not complete in time.
    #[error("capture request timed out after {0} ms")]
    TimedOut(u64),
}

/// Failures a unit reports from `render`. Never fatal to the graph.
#[derive(Debug, Error)]
pub enum UnitError {
    /// Primitive creation or replacement failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A worklet or formula did not compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A capture device was refused.
    #[error(transparent)]
    Permission(#[from] PermissionError),
}
