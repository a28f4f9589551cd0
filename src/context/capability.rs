use crate::context::value::{ArgValue, CallOutput};
use crate::foundation::error::{GlmuxError, GlmuxResult};
use std::collections::{BTreeMap, HashMap};

/// Everything a shared context exposes, as reported by introspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSurface {
    /// Names of invocable operations.
    pub operations: Vec<String>,
    /// Named numeric constants.
    pub constants: BTreeMap<String, f64>,
}

/// Dense index of an operation in a [`CapabilityTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// An operation name that has been resolved against the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundOp<'a> {
    /// Table index of the operation.
    pub id: OpId,
    /// Canonical operation name.
    pub name: &'a str,
}

/// The single shared, stateful rendering context.
///
/// Implementations are driven by exactly one caller at a time; the multiplexer owns the
/// context and never invokes it concurrently.
pub trait RenderContext {
    /// Enumerate invocable operations and numeric constants. Called once at startup.
    fn surface(&self) -> ContextSurface;

    /// Invoke `op` with already-resolved arguments.
    fn invoke(&mut self, op: BoundOp<'_>, args: &[ArgValue]) -> GlmuxResult<CallOutput>;
}

/// Operations and constants discovered from the shared context; immutable once built.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    ids_by_name: HashMap<String, OpId>,
    names_by_id: Vec<String>,
    constants: BTreeMap<String, f64>,
}

impl CapabilityTable {
    /// Build a table from an introspected surface. Operation names are sorted and deduplicated.
    pub fn from_surface(surface: ContextSurface) -> Self {
        let mut names = surface.operations;
        names.sort();
        names.dedup();

        let ids_by_name = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), OpId(i as u32)))
            .collect();

        Self {
            ids_by_name,
            names_by_id: names,
            constants: surface.constants,
        }
    }

    /// Introspect `ctx` and build its table.
    pub fn discover(ctx: &impl RenderContext) -> Self {
        Self::from_surface(ctx.surface())
    }

    /// Resolve an operation name.
    pub fn lookup(&self, name: &str) -> Option<BoundOp<'_>> {
        let &id = self.ids_by_name.get(name)?;
        Some(BoundOp {
            id,
            name: &self.names_by_id[id.0 as usize],
        })
    }

    /// `true` when `name` is an invocable operation.
    pub fn contains(&self, name: &str) -> bool {
        self.ids_by_name.contains_key(name)
    }

    /// Value of a named constant.
    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    /// Operation names in table order.
    pub fn operations(&self) -> &[String] {
        &self.names_by_id
    }

    /// All named constants.
    pub fn constants(&self) -> &BTreeMap<String, f64> {
        &self.constants
    }
}

/// Owns the shared context together with its capability table.
///
/// All invocations, client-initiated or scheduler-initiated, pass through [`ContextHost::invoke`].
pub struct ContextHost<C> {
    context: C,
    capabilities: CapabilityTable,
}

impl<C: RenderContext> ContextHost<C> {
    /// Discover the context's capabilities and take ownership of it.
    pub fn new(context: C) -> Self {
        let capabilities = CapabilityTable::discover(&context);
        tracing::debug!(
            operations = capabilities.operations().len(),
            constants = capabilities.constants().len(),
            "capability table built"
        );
        Self {
            context,
            capabilities,
        }
    }

    /// The immutable capability table.
    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Borrow the underlying context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutably borrow the underlying context.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Give the context back.
    pub fn into_context(self) -> C {
        self.context
    }

    /// Invoke a named operation. Names absent from the table are rejected without touching
    /// the context.
    pub fn invoke(&mut self, name: &str, args: &[ArgValue]) -> GlmuxResult<CallOutput> {
        let op = self
            .capabilities
            .lookup(name)
            .ok_or_else(|| GlmuxError::unsupported(name))?;
        self.context.invoke(op, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> ContextSurface {
        let mut constants = BTreeMap::new();
        constants.insert("DEPTH_TEST".to_owned(), 2929.0);
        ContextSurface {
            operations: vec!["enable".to_owned(), "clear".to_owned(), "enable".to_owned()],
            constants,
        }
    }

    #[test]
    fn table_dedups_and_sorts_operations() {
        let t = CapabilityTable::from_surface(surface());
        assert_eq!(t.operations(), ["clear".to_owned(), "enable".to_owned()]);
        assert_eq!(t.lookup("enable").unwrap().id, OpId(1));
        assert_eq!(t.lookup("enable").unwrap().name, "enable");
        assert!(t.lookup("drawElements").is_none());
        assert_eq!(t.constant("DEPTH_TEST"), Some(2929.0));
        assert_eq!(t.constant("LEQUAL"), None);
    }
}
