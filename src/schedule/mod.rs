//! Frame scheduling: participant sampling, the proxy registry, the per-frame reset and the
//! multiplexer that drives them.

/// Frame scheduler, inbound bus and client ports.
pub mod multiplexer;
/// Multiplexer options.
pub mod opts;
/// Active proxy set.
pub mod registry;
/// Per-frame context reset.
pub mod reset;
/// Capacity-limited uniform sampling.
pub mod sampler;
