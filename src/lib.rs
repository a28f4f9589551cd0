//! glmux shares one stateful rendering context between many isolated clients.
//!
//! Each client talks to its own [`ClientProxy`] over a channel. Between frames, commands
//! run immediately and opaque results come back as handle references. During a frame, a
//! random subset of at most `capacity` clients is asked for a command batch; once they
//! finish (or the frame timeout passes) the [`Multiplexer`] resets the context and replays
//! every completed batch in order.
//!
//! - Wrap a context in something implementing [`RenderContext`]
//! - Create a [`Multiplexer`] with [`MuxOpts`] and keep its [`MuxHandle`]
//! - Register clients through the handle and drive them via their [`ClientPort`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// The shared context, its capability table and the values passed through it.
pub mod context;
/// Per-client proxies and the client wire format.
pub mod proxy;
/// Sampling, registry and the frame scheduler.
pub mod schedule;

pub use crate::foundation::error::{GlmuxError, GlmuxResult};
pub use crate::foundation::ids::{CallId, ClientId, FrameSeq};

pub use crate::context::capability::{
    BoundOp, CapabilityTable, ContextHost, ContextSurface, OpId, RenderContext,
};
pub use crate::context::recording::{Invocation, RecordedObject, RecordingContext};
pub use crate::context::value::{ArgValue, CallOutput, HandleRef, OpaqueObject, WireValue};

pub use crate::proxy::client_proxy::{
    ClientEndpoint, ClientProxy, Delivery, FrameTicket, ProxyStats,
};
pub use crate::proxy::handles::HandleTable;
pub use crate::proxy::message::{
    ClientMessage, CommandFault, CommandMessage, FaultKind, ProxyMessage,
};
pub use crate::proxy::policy::{CommandPolicy, RejectionMode};

pub use crate::schedule::multiplexer::{
    ClientDeleted, ClientPort, CycleReport, Multiplexer, MuxEvent, MuxHandle, MuxStats,
};
pub use crate::schedule::opts::MuxOpts;
pub use crate::schedule::registry::Registry;
pub use crate::schedule::reset::{ResetArg, ResetStep, default_reset_sequence, run_reset};
pub use crate::schedule::sampler::{sample, sample_indices};
