use crate::context::value::{ArgValue, HandleRef, OpaqueObject, WireValue};
use crate::foundation::error::{GlmuxError, GlmuxResult};
use crate::foundation::ids::CallId;
use std::collections::HashMap;

/// Per-client store of non-transferable results, keyed by the producing call's id.
///
/// Entries live as long as the owning proxy. Reusing a call id overwrites the entry.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: HashMap<CallId, OpaqueObject>,
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj` under `key` and return the reference the client will see.
    pub fn issue(&mut self, key: CallId, obj: OpaqueObject) -> HandleRef {
        self.entries.insert(key, obj);
        HandleRef::new(key)
    }

    /// Look up an issued handle.
    pub fn get(&self, key: CallId) -> Option<&OpaqueObject> {
        self.entries.get(&key)
    }

    /// Resolve a handle reference into the stored object (shared, not copied).
    pub fn resolve(&self, handle: HandleRef) -> GlmuxResult<OpaqueObject> {
        self.entries
            .get(&handle.key)
            .cloned()
            .ok_or(GlmuxError::UnknownHandle { key: handle.key.0 })
    }

    /// Resolve every argument of a call. Fails on the first dangling reference.
    pub fn resolve_args(&self, args: &[WireValue]) -> GlmuxResult<Vec<ArgValue>> {
        args.iter()
            .map(|a| match a {
                WireValue::Handle(h) => self.resolve(*h).map(ArgValue::Object),
                WireValue::Value(v) => Ok(ArgValue::Value(v.clone())),
            })
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing has been issued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
