use crate::foundation::ids::CallId;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A non-transferable result object produced by the shared context.
///
/// Cloning shares the underlying object; it is never serialized. Clients only ever see a
/// [`HandleRef`] standing in for it.
#[derive(Clone)]
pub struct OpaqueObject(Rc<dyn Any>);

impl OpaqueObject {
    /// Wrap a context-owned object.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the object as `T` if that is its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Reference equality: `true` when both point at the same stored object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for OpaqueObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueObject({:p})", Rc::as_ptr(&self.0))
    }
}

/// Indirection token for an [`OpaqueObject`] held in the issuing client's handle table.
///
/// Wire form: `{ "handleRef": true, "key": <call id> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "HandleRefRepr", into = "HandleRefRepr")]
pub struct HandleRef {
    /// Handle table key; the id of the call that produced the object.
    pub key: CallId,
}

impl HandleRef {
    /// Reference to the result of call `key`.
    pub fn new(key: CallId) -> Self {
        Self { key }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct HandleRefRepr {
    handle_ref: bool,
    key: u64,
}

impl TryFrom<HandleRefRepr> for HandleRef {
    type Error = String;

    fn try_from(repr: HandleRefRepr) -> Result<Self, Self::Error> {
        if !repr.handle_ref {
            return Err("handleRef marker must be true".to_owned());
        }
        Ok(Self::new(CallId(repr.key)))
    }
}

impl From<HandleRef> for HandleRefRepr {
    fn from(h: HandleRef) -> Self {
        Self {
            handle_ref: true,
            key: h.key.0,
        }
    }
}

/// A value as it crosses the isolation boundary: a plain JSON value or a handle reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    /// Stand-in for an object living in the proxy's handle table.
    Handle(HandleRef),
    /// Transferable primitive (or plain data) value.
    Value(serde_json::Value),
}

impl WireValue {
    /// JSON `null`, the result of calls returning nothing.
    pub fn null() -> Self {
        Self::Value(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}

impl From<HandleRef> for WireValue {
    fn from(h: HandleRef) -> Self {
        Self::Handle(h)
    }
}

/// A resolved argument handed to the shared context.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// Literal value from the client.
    Value(serde_json::Value),
    /// Object looked up from the client's handle table.
    Object(OpaqueObject),
}

impl ArgValue {
    /// Numeric view of a literal argument.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => v.as_f64(),
            Self::Object(_) => None,
        }
    }

    /// Object view of a handle-resolved argument.
    pub fn as_object(&self) -> Option<&OpaqueObject> {
        match self {
            Self::Value(_) => None,
            Self::Object(o) => Some(o),
        }
    }
}

/// What the shared context returned for one invocation.
#[derive(Debug, Clone)]
pub enum CallOutput {
    /// Transferable value; `null` for operations with no result.
    Primitive(serde_json::Value),
    /// Non-transferable object that must stay on the host side.
    Opaque(OpaqueObject),
}

impl CallOutput {
    /// The no-result output.
    pub fn none() -> Self {
        Self::Primitive(serde_json::Value::Null)
    }
}
