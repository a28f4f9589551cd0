//! The shared rendering context as seen by the multiplexer: an opaque capability table of
//! named operations and constants, plus the values that flow in and out of it.

/// Context trait, capability discovery and the owning host.
pub mod capability;
/// In-memory recording context.
pub mod recording;
/// Argument/result values and handle references.
pub mod value;
