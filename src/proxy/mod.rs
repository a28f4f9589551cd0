//! Per-client interception: wire messages, handle tables and the client proxy.

/// The per-client proxy.
pub mod client_proxy;
/// Per-client opaque handle table.
pub mod handles;
/// Wire schema between clients and proxies.
pub mod message;
/// Blacklist, state-command predicate and rejection mode.
pub mod policy;
