use crate::context::capability::{BoundOp, ContextSurface, RenderContext};
use crate::context::value::{ArgValue, CallOutput, OpaqueObject};
use crate::foundation::error::{GlmuxError, GlmuxResult};
use std::collections::{BTreeMap, HashSet};

const WEBGL_OPERATIONS: &[&str] = &[
    "attachShader",
    "bindBuffer",
    "bufferData",
    "clear",
    "clearColor",
    "clearDepth",
    "compileShader",
    "createBuffer",
    "createProgram",
    "createShader",
    "depthFunc",
    "drawArrays",
    "enable",
    "enableVertexAttribArray",
    "getAttribLocation",
    "getError",
    "getUniformLocation",
    "linkProgram",
    "shaderSource",
    "uniform1f",
    "uniformMatrix4fv",
    "useProgram",
    "vertexAttribPointer",
    "viewport",
];

const WEBGL_CONSTANTS: &[(&str, f64)] = &[
    ("ARRAY_BUFFER", 34962.0),
    ("COLOR_BUFFER_BIT", 16384.0),
    ("DEPTH_BUFFER_BIT", 256.0),
    ("DEPTH_TEST", 2929.0),
    ("FLOAT", 5126.0),
    ("FRAGMENT_SHADER", 35632.0),
    ("LEQUAL", 515.0),
    ("NO_ERROR", 0.0),
    ("STATIC_DRAW", 35044.0),
    ("TRIANGLES", 4.0),
    ("VERTEX_SHADER", 35633.0),
];

/// Object handed out by [`RecordingContext`] for `create*` style operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedObject {
    /// What was created, e.g. `Buffer` for `createBuffer`.
    pub kind: String,
    /// Creation order across the whole context, starting at 1.
    pub serial: u64,
}

/// One call observed by a [`RecordingContext`].
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Operation name.
    pub op: String,
    /// Arguments exactly as the context received them.
    pub args: Vec<ArgValue>,
}

/// In-memory context that records every invocation, for tests and simulation.
///
/// Operations named `create*` and `getUniformLocation` return opaque objects, `getError` and
/// `getAttribLocation` return numbers, everything else returns nothing.
#[derive(Debug, Default)]
pub struct RecordingContext {
    surface: ContextSurface,
    log: Vec<Invocation>,
    next_serial: u64,
    failing: HashSet<String>,
}

impl RecordingContext {
    /// Create a context exposing exactly `surface`.
    pub fn new(surface: ContextSurface) -> Self {
        Self {
            surface,
            ..Self::default()
        }
    }

    /// A context exposing a representative WebGL-like operation set and constants.
    pub fn webgl_like() -> Self {
        let constants: BTreeMap<String, f64> = WEBGL_CONSTANTS
            .iter()
            .map(|&(k, v)| (k.to_owned(), v))
            .collect();
        Self::new(ContextSurface {
            operations: WEBGL_OPERATIONS.iter().map(|s| (*s).to_owned()).collect(),
            constants,
        })
    }

    /// Make every future invocation of `op` fail with a context error.
    pub fn fail_on(&mut self, op: impl Into<String>) {
        self.failing.insert(op.into());
    }

    /// Invocations in the order they happened.
    pub fn invocations(&self) -> &[Invocation] {
        &self.log
    }

    /// Just the operation names of [`RecordingContext::invocations`].
    pub fn op_names(&self) -> Vec<&str> {
        self.log.iter().map(|i| i.op.as_str()).collect()
    }

    /// Drain the invocation log.
    pub fn take_invocations(&mut self) -> Vec<Invocation> {
        std::mem::take(&mut self.log)
    }

    fn make_object(&mut self, kind: &str) -> OpaqueObject {
        self.next_serial += 1;
        OpaqueObject::new(RecordedObject {
            kind: kind.to_owned(),
            serial: self.next_serial,
        })
    }
}

impl RenderContext for RecordingContext {
    fn surface(&self) -> ContextSurface {
        self.surface.clone()
    }

    fn invoke(&mut self, op: BoundOp<'_>, args: &[ArgValue]) -> GlmuxResult<CallOutput> {
        self.log.push(Invocation {
            op: op.name.to_owned(),
            args: args.to_vec(),
        });

        if self.failing.contains(op.name) {
            return Err(GlmuxError::context(format!("{} failed", op.name)));
        }

        let out = match op.name {
            "getUniformLocation" => CallOutput::Opaque(self.make_object("UniformLocation")),
            "getError" => CallOutput::Primitive(serde_json::json!(0)),
            "getAttribLocation" => CallOutput::Primitive(serde_json::json!(0)),
            name => match name.strip_prefix("create") {
                Some(kind) if !kind.is_empty() => CallOutput::Opaque(self.make_object(kind)),
                _ => CallOutput::none(),
            },
        };
        Ok(out)
    }
}
