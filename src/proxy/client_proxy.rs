use crate::context::capability::{ContextHost, RenderContext};
use crate::context::value::{CallOutput, WireValue};
use crate::foundation::error::{GlmuxError, GlmuxResult};
use crate::foundation::ids::{ClientId, FrameSeq};
use crate::proxy::handles::HandleTable;
use crate::proxy::message::{ClientMessage, CommandFault, CommandMessage, ProxyMessage};
use crate::proxy::policy::{CommandPolicy, RejectionMode};
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

/// Sending side of a client's isolation channel.
pub type ClientEndpoint = mpsc::UnboundedSender<ProxyMessage>;

/// What [`ClientProxy::on_incoming_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Addressed to another client.
    Ignored,
    /// Resolved the outstanding frame request.
    FrameCompleted,
    /// Queued for this frame's replay.
    Buffered,
    /// Executed immediately and answered.
    Executed,
    /// `frameEnd` with no request outstanding.
    Dropped,
    /// Late traffic for an abandoned frame, thrown away.
    Discarded,
}

/// Counters kept per proxy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Commands that reached the shared context.
    pub executed: u64,
    /// Commands rejected before (or by) the shared context.
    pub rejected: u64,
    /// Cycles this proxy was sampled into.
    pub sampled: u64,
}

/// Single-use completion signal for one outstanding frame request.
#[derive(Debug)]
pub struct FrameTicket {
    client: ClientId,
    rx: oneshot::Receiver<()>,
}

impl FrameTicket {
    /// Client the request was sent to.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Wait for the client's `frameEnd`. Yields `false` when the request was abandoned or the
    /// proxy went away.
    pub async fn wait(self) -> (ClientId, bool) {
        let done = self.rx.await.is_ok();
        (self.client, done)
    }
}

/// Mediator between one isolated client and the shared context.
///
/// Commands are executed immediately while idle and queued while a frame is being produced;
/// queued commands are replayed, in submission order, when the scheduler says so.
pub struct ClientProxy {
    client_id: ClientId,
    endpoint: ClientEndpoint,
    policy: Rc<CommandPolicy>,
    handles: HandleTable,

    buffering: bool,
    pending: Vec<CommandMessage>,
    last_state: Option<CommandMessage>,
    frame_signal: Option<oneshot::Sender<()>>,
    // Abandoned frames whose `frameEnd` has not arrived yet.
    stale_frames: u32,

    stats: ProxyStats,
}

impl ClientProxy {
    /// Create a proxy for `client_id` talking over `endpoint`.
    pub fn new(client_id: ClientId, endpoint: ClientEndpoint, policy: Rc<CommandPolicy>) -> Self {
        Self {
            client_id,
            endpoint,
            policy,
            handles: HandleTable::new(),
            buffering: false,
            pending: Vec::new(),
            last_state: None,
            frame_signal: None,
            stale_frames: 0,
            stats: ProxyStats::default(),
        }
    }

    /// Client this proxy serves.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// `true` while a frame batch is being collected.
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Commands queued for the next replay.
    pub fn pending(&self) -> &[CommandMessage] {
        &self.pending
    }

    /// This client's handle table.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// `true` while a frame request awaits its `frameEnd`.
    pub fn has_outstanding_frame(&self) -> bool {
        self.frame_signal.is_some()
    }

    /// `true` while traffic for an abandoned frame is still expected.
    pub fn is_draining(&self) -> bool {
        self.stale_frames > 0
    }

    /// Per-proxy counters.
    pub fn stats(&self) -> ProxyStats {
        self.stats
    }

    pub(crate) fn mark_sampled(&mut self) {
        self.stats.sampled = self.stats.sampled.saturating_add(1);
    }

    /// Push a message to the client.
    pub fn send(&self, msg: ProxyMessage) -> GlmuxResult<()> {
        self.endpoint
            .send(msg)
            .map_err(|_| GlmuxError::transport(format!("client {} endpoint closed", self.client_id)))
    }

    /// Handle one message from the shared inbound bus.
    ///
    /// After [`ClientProxy::abandon_frame`] the client still owes the abandoned batch and its
    /// `frameEnd`. Until that `frameEnd` arrives, its calls are discarded, so a late batch can
    /// neither run immediately nor complete a later frame request.
    pub fn on_incoming_message<C: RenderContext>(
        &mut self,
        host: &mut ContextHost<C>,
        msg: ClientMessage,
    ) -> Delivery {
        if msg.client_id() != self.client_id {
            return Delivery::Ignored;
        }

        if self.stale_frames > 0 {
            if let ClientMessage::FrameEnd { .. } = msg {
                self.stale_frames -= 1;
                tracing::debug!(client = %self.client_id, "late frameEnd for an abandoned frame");
            }
            return Delivery::Discarded;
        }

        let cmd = match msg {
            ClientMessage::FrameEnd { .. } => {
                return match self.frame_signal.take() {
                    Some(signal) => {
                        // The scheduler may have stopped waiting already.
                        let _ = signal.send(());
                        Delivery::FrameCompleted
                    }
                    None => {
                        tracing::debug!(client = %self.client_id, "frameEnd without a frame request");
                        Delivery::Dropped
                    }
                };
            }
            ClientMessage::Call(cmd) => cmd,
        };

        if self.buffering {
            self.pending.push(cmd);
            return Delivery::Buffered;
        }

        let (result, error) = match self.run_command(host, &cmd) {
            Ok(v) => (v, None),
            Err(e) => match self.policy.rejection() {
                RejectionMode::Silent => (WireValue::null(), None),
                RejectionMode::Report => (WireValue::null(), Some(CommandFault::from(&e))),
            },
        };
        let reply = ProxyMessage::Reply {
            call_id: cmd.call_id,
            result,
            error,
        };
        if let Err(e) = self.send(reply) {
            tracing::warn!(client = %self.client_id, error = %e, "reply not delivered");
        }
        Delivery::Executed
    }

    /// Execute one command against the shared context.
    ///
    /// Handle references are resolved first; names missing from the capability table or on
    /// the blacklist never reach the context. Opaque results are stored under the call id and
    /// a handle reference is returned in their place.
    pub fn execute_command<C: RenderContext>(
        &mut self,
        host: &mut ContextHost<C>,
        cmd: &CommandMessage,
    ) -> GlmuxResult<WireValue> {
        let args = self.handles.resolve_args(&cmd.args)?;
        let name = cmd.operation_name.as_str();

        if !host.capabilities().contains(name) {
            return Err(GlmuxError::unsupported(name));
        }
        if self.policy.is_forbidden(name) {
            return Err(GlmuxError::forbidden(name));
        }
        if self.policy.is_state_command(name) {
            self.last_state = Some(cmd.clone());
        }

        match host.invoke(name, &args)? {
            CallOutput::Primitive(v) => Ok(WireValue::Value(v)),
            CallOutput::Opaque(obj) => Ok(WireValue::Handle(self.handles.issue(cmd.call_id, obj))),
        }
    }

    fn run_command<C: RenderContext>(
        &mut self,
        host: &mut ContextHost<C>,
        cmd: &CommandMessage,
    ) -> GlmuxResult<WireValue> {
        let res = self.execute_command(host, cmd);
        match &res {
            Ok(_) => {
                self.stats.executed = self.stats.executed.saturating_add(1);
                tracing::debug!(client = %self.client_id, op = %cmd.operation_name, "executed");
            }
            Err(e) => {
                self.stats.rejected = self.stats.rejected.saturating_add(1);
                tracing::warn!(
                    client = %self.client_id,
                    call = cmd.call_id.0,
                    op = %cmd.operation_name,
                    error = %e,
                    "command rejected"
                );
            }
        }
        res
    }

    /// Ask the client for this frame's batch and start buffering.
    ///
    /// The last state command, if any, is queued first so it is re-asserted before the
    /// client's fresh commands.
    pub fn get_frame_commands(&mut self, frame: FrameSeq) -> GlmuxResult<FrameTicket> {
        if self.frame_signal.is_some() {
            return Err(GlmuxError::FrameAlreadyRequested {
                client: self.client_id,
            });
        }

        self.buffering = true;
        if let Some(state) = &self.last_state {
            self.pending.push(state.clone());
        }

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if let Err(e) = self.send(ProxyMessage::ProduceFrame { frame, timestamp }) {
            self.buffering = false;
            self.pending.clear();
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        self.frame_signal = Some(tx);
        Ok(FrameTicket {
            client: self.client_id,
            rx,
        })
    }

    /// Leave buffering mode and replay every queued command in order. No replies are sent.
    ///
    /// Returns the number of commands replayed.
    pub fn execute_frame_commands<C: RenderContext>(&mut self, host: &mut ContextHost<C>) -> usize {
        self.buffering = false;
        let batch = std::mem::take(&mut self.pending);
        for cmd in &batch {
            let _ = self.run_command(host, cmd);
        }
        batch.len()
    }

    /// Give up on the outstanding frame: drop the signal and the partial batch.
    ///
    /// If the client has not sent its `frameEnd` yet, the proxy drains: the rest of that batch
    /// and its `frameEnd` are discarded when they arrive. Returns the number of discarded
    /// commands.
    pub fn abandon_frame(&mut self) -> usize {
        if self.frame_signal.take().is_some() {
            self.stale_frames += 1;
        }
        self.buffering = false;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
#[path = "../../tests/unit/proxy/client_proxy.rs"]
mod tests;
