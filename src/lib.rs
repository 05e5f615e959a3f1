//! Klangnetz - live modular patching over a lock-free audio graph
//!
//! Design principles:
//! - A patch is a plain description: nodes with parameters, edges between named ports
//! - Edges into an audio input become primitive connections, everything else
//!   becomes event forwarding on the router
//! - Audio primitives receive parameters via message ring buffers, not shared state
//! - Orchestration is single-threaded; only the audio engine crosses threads
//! - Edits are diffed, so untouched nodes keep their state

extern crate alloc;

mod config;
mod description;
mod device;
mod engine;
mod error;
mod expr;
mod graph;
mod node;
mod orchestrator;
mod params;
mod timers;

pub mod nodes;
pub mod router;
pub mod unit;

pub use config::{OrchestratorConfig, ReconcileMode};
pub use description::{EdgeDescriptor, EdgeId, GraphDescription, NodeDescriptor, NodeId};
pub use device::CpalDevice;
#[cfg(feature = "cpal_sink")]
pub use device::CpalCapture;
pub use engine::{AudioEngine, CaptureProvider, Handle, DEFAULT_MAX_PRIMITIVES, DEFAULT_QUEUE_SIZE};
pub use error::{CompileError, EngineError, EvalFault, GraphError, PermissionError, UnitError};
pub use expr::Expression;
pub use node::{AudioNode, PrimitiveId, ProcessContext};
pub use orchestrator::{Notice, Orchestrator, Plane};
pub use params::{params, Params, ParamsExt};
pub use router::{Event, EventRouter, Origin, Payload, Subscription, Topic, Verb};
pub use timers::{TimerId, Timers};
