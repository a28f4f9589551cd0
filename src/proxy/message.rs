use crate::context::capability::CapabilityTable;
use crate::context::value::WireValue;
use crate::foundation::error::GlmuxError;
use crate::foundation::ids::{CallId, ClientId, FrameSeq};
use std::collections::BTreeMap;

/// A client's request to run one operation on the shared context.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    /// Addressed client; proxies ignore messages for other clients.
    pub client_id: ClientId,
    /// Unique per in-flight call; becomes the handle key for opaque results.
    pub call_id: CallId,
    /// Operation to invoke.
    pub operation_name: String,
    /// Positional arguments, literal or handle references.
    #[serde(default)]
    pub args: Vec<WireValue>,
}

impl CommandMessage {
    /// Build a command for `client_id`.
    pub fn new(
        client_id: ClientId,
        call_id: CallId,
        operation_name: impl Into<String>,
        args: Vec<WireValue>,
    ) -> Self {
        Self {
            client_id,
            call_id,
            operation_name: operation_name.into(),
            args,
        }
    }
}

/// Client -> proxy traffic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// One command request.
    Call(CommandMessage),
    /// Sentinel closing the batch produced for a `produceFrame` request.
    #[serde(rename_all = "camelCase")]
    FrameEnd {
        /// Sending client.
        client_id: ClientId,
    },
}

impl ClientMessage {
    /// Client the message is addressed from/to.
    pub fn client_id(&self) -> ClientId {
        match self {
            Self::Call(cmd) => cmd.client_id,
            Self::FrameEnd { client_id } => *client_id,
        }
    }
}

/// Proxy -> client traffic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProxyMessage {
    /// First message after registration: the identifier to stamp on every request.
    #[serde(rename_all = "camelCase")]
    Assigned {
        /// Process-unique client identifier.
        client_id: ClientId,
    },
    /// Capability table snapshot so the client can validate and encode calls locally.
    Bootstrap {
        /// Invocable operation names.
        operations: Vec<String>,
        /// Named numeric constants.
        constants: BTreeMap<String, f64>,
    },
    /// Result of a non-buffered call.
    #[serde(rename_all = "camelCase")]
    Reply {
        /// Call being answered.
        call_id: CallId,
        /// Returned value; `null` when the call produced nothing.
        #[serde(default = "WireValue::null")]
        result: WireValue,
        /// Present when the call was rejected and rejections are reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CommandFault>,
    },
    /// Request to produce this cycle's command batch, terminated by `frameEnd`.
    ProduceFrame {
        /// Cycle sequence number.
        frame: FrameSeq,
        /// Milliseconds since the Unix epoch at request time.
        timestamp: u64,
    },
}

impl ProxyMessage {
    /// Bootstrap message for `caps`.
    pub fn bootstrap(caps: &CapabilityTable) -> Self {
        Self::Bootstrap {
            operations: caps.operations().to_vec(),
            constants: caps.constants().clone(),
        }
    }
}

/// Category of a rejected command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    /// Operation absent from the capability table.
    UnsupportedOperation,
    /// Operation reserved for the scheduler.
    ForbiddenOperation,
    /// Argument referenced an unissued handle key.
    UnknownHandle,
    /// The context itself failed.
    ContextFailure,
}

/// Serializable description of why a command did not run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandFault {
    /// Category.
    pub kind: FaultKind,
    /// Human-readable detail.
    pub message: String,
}

impl From<&GlmuxError> for CommandFault {
    fn from(e: &GlmuxError) -> Self {
        let kind = match e {
            GlmuxError::UnsupportedOperation { .. } => FaultKind::UnsupportedOperation,
            GlmuxError::ForbiddenOperation { .. } => FaultKind::ForbiddenOperation,
            GlmuxError::UnknownHandle { .. } => FaultKind::UnknownHandle,
            _ => FaultKind::ContextFailure,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}
