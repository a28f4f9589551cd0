use crate::context::capability::{CapabilityTable, ContextHost, RenderContext};
use crate::context::value::ArgValue;
use crate::foundation::error::{GlmuxError, GlmuxResult};

/// One argument of a reset step.
///
/// JSON form: a number, a constant name, or a list of constant names OR-ed together.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ResetArg {
    /// Literal number.
    Number(f64),
    /// Value of a named constant.
    Constant(String),
    /// Bitwise OR of several named constants.
    AnyOf(Vec<String>),
}

/// One operation of the per-frame reset sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResetStep {
    /// Operation name.
    pub op: String,
    /// Arguments, resolved against the capability table at run time.
    #[serde(default)]
    pub args: Vec<ResetArg>,
}

impl ResetStep {
    /// Build a step.
    pub fn new(op: impl Into<String>, args: Vec<ResetArg>) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }

    fn resolve_args(&self, caps: &CapabilityTable) -> GlmuxResult<Vec<ArgValue>> {
        let constant = |name: &str| {
            caps.constant(name)
                .ok_or_else(|| GlmuxError::validation(format!("unknown constant '{name}'")))
        };
        self.args
            .iter()
            .map(|a| {
                let v = match a {
                    ResetArg::Number(n) => serde_json::json!(n),
                    ResetArg::Constant(name) => serde_json::json!(constant(name)?),
                    ResetArg::AnyOf(names) => {
                        let mut bits = 0u64;
                        for name in names {
                            bits |= constant(name)? as u64;
                        }
                        serde_json::json!(bits)
                    }
                };
                Ok(ArgValue::Value(v))
            })
            .collect()
    }
}

/// Clear to transparent black, clear depth to 1, enable depth testing with `LEQUAL`, then
/// clear the color and depth buffers.
pub fn default_reset_sequence() -> Vec<ResetStep> {
    use ResetArg::{AnyOf, Constant, Number};
    vec![
        ResetStep::new(
            "clearColor",
            vec![Number(0.0), Number(0.0), Number(0.0), Number(0.0)],
        ),
        ResetStep::new("clearDepth", vec![Number(1.0)]),
        ResetStep::new("enable", vec![Constant("DEPTH_TEST".to_owned())]),
        ResetStep::new("depthFunc", vec![Constant("LEQUAL".to_owned())]),
        ResetStep::new(
            "clear",
            vec![AnyOf(vec![
                "COLOR_BUFFER_BIT".to_owned(),
                "DEPTH_BUFFER_BIT".to_owned(),
            ])],
        ),
    ]
}

/// Run the reset sequence with scheduler authority (the client blacklist does not apply).
///
/// Steps that cannot be resolved or that fail are skipped with a warning. Returns the number
/// of steps that ran.
pub fn run_reset<C: RenderContext>(host: &mut ContextHost<C>, steps: &[ResetStep]) -> usize {
    let mut ran = 0;
    for step in steps {
        let res = step
            .resolve_args(host.capabilities())
            .and_then(|args| host.invoke(&step.op, &args));
        match res {
            Ok(_) => ran += 1,
            Err(e) => tracing::warn!(op = %step.op, error = %e, "reset step skipped"),
        }
    }
    ran
}
