use crate::context::capability::{ContextHost, RenderContext};
use crate::context::value::WireValue;
use crate::foundation::error::{GlmuxError, GlmuxResult};
use crate::foundation::ids::{CallId, ClientId, FrameSeq};
use crate::proxy::client_proxy::{ClientEndpoint, Delivery};
use crate::proxy::message::{ClientMessage, CommandMessage, ProxyMessage};
use crate::proxy::policy::CommandPolicy;
use crate::schedule::opts::MuxOpts;
use crate::schedule::registry::Registry;
use crate::schedule::reset::run_reset;
use crate::schedule::sampler::sample;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Events applied right before a cycle, at most.
const EVENTS_PER_TICK: usize = 1024;

/// Everything that can arrive on the shared inbound bus.
#[derive(Debug)]
pub enum MuxEvent {
    /// Traffic from a client.
    Client(ClientMessage),
    /// A new client wants a proxy; its outbound messages go to `endpoint`.
    Register {
        /// External key identifying the client (a tool key in the host application).
        key: String,
        /// Where proxy messages for this client are delivered.
        endpoint: ClientEndpoint,
    },
    /// Tear down the proxy registered under `key`.
    Unregister {
        /// External client key.
        key: String,
    },
    /// Host-level deletion notification, filtered by [`Multiplexer::on_client_deleted`].
    ClientDeleted(ClientDeleted),
    /// Stop the run loop after the current step.
    Shutdown,
}

/// Host teardown notification.
///
/// Only tool-level deletions (object and tool named, no node) remove a proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientDeleted {
    /// Owning object.
    pub object_key: Option<String>,
    /// Tool, matching the key a client registered under.
    pub tool_key: Option<String>,
    /// Node within the tool; set for finer-grained deletions that keep the tool alive.
    pub node_key: Option<String>,
}

/// Outcome of one scheduling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Cycle sequence number, starting at 1.
    pub cycle: u64,
    /// Proxies sampled into this cycle, in sample order.
    pub participants: Vec<ClientId>,
    /// Participants whose batches were replayed, in replay order.
    pub replayed: Vec<ClientId>,
    /// Participants that missed the frame deadline.
    pub timed_out: Vec<ClientId>,
    /// Participants removed while the cycle was in flight.
    pub departed: Vec<ClientId>,
    /// Commands replayed against the shared context, reset steps excluded.
    pub commands_replayed: usize,
}

/// Running totals across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxStats {
    /// Completed cycles.
    pub cycles: u64,
    /// Commands replayed from frame batches.
    pub commands_replayed: u64,
    /// Commands executed outside of frames.
    pub immediate_commands: u64,
    /// Participant timeouts.
    pub timeouts: u64,
    /// Client commands rejected, immediate or replayed.
    pub rejected: u64,
}

/// Cloneable sending side of the inbound bus.
#[derive(Clone, Debug)]
pub struct MuxHandle {
    bus: mpsc::UnboundedSender<MuxEvent>,
}

impl MuxHandle {
    /// Post a raw event.
    pub fn send(&self, ev: MuxEvent) -> GlmuxResult<()> {
        self.bus
            .send(ev)
            .map_err(|_| GlmuxError::transport("multiplexer is not running"))
    }

    /// Ask for a proxy under `key` and return the client's end of the channel.
    ///
    /// The identifier arrives asynchronously as the first [`ProxyMessage::Assigned`].
    pub fn register(&self, key: impl Into<String>) -> GlmuxResult<ClientPort> {
        let key = key.into();
        let (endpoint, rx) = mpsc::unbounded_channel();
        self.send(MuxEvent::Register {
            key: key.clone(),
            endpoint,
        })?;
        Ok(ClientPort {
            key,
            client_id: None,
            bus: self.bus.clone(),
            rx,
        })
    }

    /// Remove the proxy registered under `key`.
    pub fn unregister(&self, key: impl Into<String>) -> GlmuxResult<()> {
        self.send(MuxEvent::Unregister { key: key.into() })
    }

    /// Forward a host deletion notification.
    pub fn client_deleted(&self, ev: ClientDeleted) -> GlmuxResult<()> {
        self.send(MuxEvent::ClientDeleted(ev))
    }

    /// Stop the run loop.
    pub fn shutdown(&self) -> GlmuxResult<()> {
        self.send(MuxEvent::Shutdown)
    }
}

/// A client's view of its isolation channel.
#[derive(Debug)]
pub struct ClientPort {
    key: String,
    client_id: Option<ClientId>,
    bus: mpsc::UnboundedSender<MuxEvent>,
    rx: mpsc::UnboundedReceiver<ProxyMessage>,
}

impl ClientPort {
    /// Key this port registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identifier assigned by the multiplexer, once received.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Next message from the proxy; `None` once the proxy is gone.
    pub async fn recv(&mut self) -> Option<ProxyMessage> {
        let msg = self.rx.recv().await?;
        self.observe(&msg);
        Some(msg)
    }

    /// Non-blocking [`ClientPort::recv`].
    pub fn try_recv(&mut self) -> Option<ProxyMessage> {
        let msg = self.rx.try_recv().ok()?;
        self.observe(&msg);
        Some(msg)
    }

    fn observe(&mut self, msg: &ProxyMessage) {
        if let ProxyMessage::Assigned { client_id } = msg {
            self.client_id = Some(*client_id);
        }
    }

    fn assigned(&self) -> GlmuxResult<ClientId> {
        self.client_id.ok_or_else(|| {
            GlmuxError::validation(format!("client '{}' has no identifier yet", self.key))
        })
    }

    /// Post a message to the shared bus.
    pub fn send(&self, msg: ClientMessage) -> GlmuxResult<()> {
        self.bus
            .send(MuxEvent::Client(msg))
            .map_err(|_| GlmuxError::transport("multiplexer is not running"))
    }

    /// Request one operation on the shared context.
    pub fn call(
        &self,
        call_id: CallId,
        operation_name: impl Into<String>,
        args: Vec<WireValue>,
    ) -> GlmuxResult<()> {
        let id = self.assigned()?;
        self.send(ClientMessage::Call(CommandMessage::new(
            id,
            call_id,
            operation_name,
            args,
        )))
    }

    /// Close the batch for the current frame request.
    pub fn frame_end(&self) -> GlmuxResult<()> {
        let id = self.assigned()?;
        self.send(ClientMessage::FrameEnd { client_id: id })
    }
}

/// Frame scheduler: owns the shared context and every proxy, and runs the
/// request/wait/reset/replay cycle.
///
/// Everything lives on one task. Between cycles, client commands run immediately; during a
/// cycle, sampled participants buffer until their `frameEnd` (or the deadline), then the
/// context is reset and each completed batch is replayed in participant order.
pub struct Multiplexer<C> {
    host: ContextHost<C>,
    registry: Registry,
    policy: Rc<CommandPolicy>,
    opts: MuxOpts,
    rng: StdRng,
    events: mpsc::UnboundedReceiver<MuxEvent>,

    cycle: u64,
    stats: MuxStats,
    shutting_down: bool,
    bus_closed: bool,
}

impl<C: RenderContext> Multiplexer<C> {
    /// Take ownership of `context`, discover its capabilities and open the inbound bus.
    pub fn new(context: C, opts: MuxOpts) -> GlmuxResult<(Self, MuxHandle)> {
        opts.validate()?;
        let (bus, events) = mpsc::unbounded_channel();
        let rng = match opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mux = Self {
            host: ContextHost::new(context),
            registry: Registry::new(),
            policy: Rc::new(opts.policy()),
            opts,
            rng,
            events,
            cycle: 0,
            stats: MuxStats::default(),
            shutting_down: false,
            bus_closed: false,
        };
        Ok((mux, MuxHandle { bus }))
    }

    /// The shared context and its capability table.
    pub fn host(&self) -> &ContextHost<C> {
        &self.host
    }

    /// Mutable access to the shared context, for inspection between cycles.
    pub fn host_mut(&mut self) -> &mut ContextHost<C> {
        &mut self.host
    }

    /// Active proxies.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Effective options.
    pub fn opts(&self) -> &MuxOpts {
        &self.opts
    }

    /// Running totals.
    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    /// Number of the last cycle started.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// `true` once a shutdown was requested or every bus sender was dropped.
    pub fn is_stopped(&self) -> bool {
        self.shutting_down || self.bus_closed
    }

    /// Create a proxy for `key` directly, bypassing the bus.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        endpoint: ClientEndpoint,
    ) -> GlmuxResult<ClientId> {
        let key = key.into();
        let id = self.registry.register(
            key.clone(),
            endpoint,
            self.policy.clone(),
            self.host.capabilities(),
        )?;
        tracing::info!(key = %key, client = %id, "client registered");
        Ok(id)
    }

    /// Remove the proxy for `key`. Returns the identifier it had.
    pub fn unregister(&mut self, key: &str) -> Option<ClientId> {
        let proxy = self.registry.unregister(key)?;
        let id = proxy.client_id();
        tracing::info!(key = %key, client = %id, "client removed");
        Some(id)
    }

    /// Apply a host deletion notification. Returns the removed client, if any.
    pub fn on_client_deleted(&mut self, ev: &ClientDeleted) -> Option<ClientId> {
        let (Some(_), Some(tool), None) = (&ev.object_key, &ev.tool_key, &ev.node_key) else {
            return None;
        };
        if self.registry.id_for(tool).is_none() {
            tracing::debug!(tool = %tool, "deletion for a tool without a proxy");
            return None;
        }
        self.unregister(tool)
    }

    /// Apply every event already queued on the bus without waiting. Returns how many were
    /// applied.
    pub fn pump_pending(&mut self) -> usize {
        self.pump_at_most(usize::MAX)
    }

    fn pump_at_most(&mut self, limit: usize) -> usize {
        let mut n = 0;
        while n < limit {
            match self.events.try_recv() {
                Ok(ev) => {
                    self.handle_event(ev);
                    n += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.bus_closed = true;
                    break;
                }
            }
        }
        n
    }

    /// Apply one bus event. Returns the client whose proxy it removed, if any.
    pub fn handle_event(&mut self, ev: MuxEvent) -> Option<ClientId> {
        match ev {
            MuxEvent::Client(msg) => {
                self.route(msg);
                None
            }
            MuxEvent::Register { key, endpoint } => {
                let replaced = self.registry.id_for(&key);
                if let Err(e) = self.register(key.clone(), endpoint) {
                    tracing::warn!(key = %key, error = %e, "registration failed");
                }
                replaced
            }
            MuxEvent::Unregister { key } => self.unregister(&key),
            MuxEvent::ClientDeleted(ev) => self.on_client_deleted(&ev),
            MuxEvent::Shutdown => {
                self.shutting_down = true;
                None
            }
        }
    }

    fn route(&mut self, msg: ClientMessage) {
        let id = msg.client_id();
        let Some(proxy) = self.registry.get_mut(id) else {
            tracing::warn!(client = %id, "message for unknown client dropped");
            return;
        };
        let rejected_before = proxy.stats().rejected;
        let delivery = proxy.on_incoming_message(&mut self.host, msg);
        if delivery == Delivery::Executed {
            self.stats.immediate_commands += 1;
        }
        self.stats.rejected += proxy.stats().rejected - rejected_before;
    }

    /// Run one full cycle: sample, request frames, wait (bounded by the frame timeout),
    /// reset the context, then replay every completed batch in participant order.
    #[tracing::instrument(skip_all, fields(cycle = tracing::field::Empty))]
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        tracing::Span::current().record("cycle", self.cycle);
        let frame = FrameSeq(self.cycle);
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        let ids: Vec<ClientId> = self.registry.iter().map(|p| p.client_id()).collect();
        let picked: Vec<ClientId> = sample(&ids, self.opts.capacity, &mut self.rng)
            .into_iter()
            .copied()
            .collect();

        let mut waits = FuturesUnordered::new();
        let mut outstanding: Vec<ClientId> = Vec::with_capacity(picked.len());
        for id in picked {
            let Some(proxy) = self.registry.get_mut(id) else {
                continue;
            };
            proxy.mark_sampled();
            report.participants.push(id);
            match proxy.get_frame_commands(frame) {
                Ok(ticket) => {
                    tracing::debug!(client = %id, "frame requested");
                    waits.push(ticket.wait());
                    outstanding.push(id);
                }
                Err(e) => {
                    tracing::warn!(client = %id, error = %e, "frame request failed");
                    report.departed.push(id);
                }
            }
        }

        // Every id in `outstanding` still has its wait in `waits`.
        let deadline = Instant::now() + self.opts.frame_timeout();
        let mut completed: HashSet<ClientId> = HashSet::new();
        while !outstanding.is_empty() {
            if self.bus_closed {
                break;
            }
            tokio::select! {
                Some((id, done)) = waits.next() => {
                    if let Some(pos) = outstanding.iter().position(|c| *c == id) {
                        outstanding.remove(pos);
                        if done {
                            completed.insert(id);
                        } else {
                            report.departed.push(id);
                        }
                    }
                }
                ev = self.events.recv(), if !self.bus_closed => match ev {
                    Some(ev) => {
                        if let Some(gone) = self.handle_event(ev) {
                            if let Some(pos) = outstanding.iter().position(|c| *c == gone) {
                                outstanding.remove(pos);
                                report.departed.push(gone);
                            } else if completed.remove(&gone) {
                                report.departed.push(gone);
                            }
                        }
                    }
                    None => self.bus_closed = true,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        drop(waits);

        for id in outstanding {
            let Some(proxy) = self.registry.get_mut(id) else {
                report.departed.push(id);
                continue;
            };
            // frameEnd was routed, but the deadline won the race against its ticket.
            if !proxy.has_outstanding_frame() && proxy.is_buffering() {
                completed.insert(id);
                continue;
            }
            let dropped = proxy.abandon_frame();
            let err = GlmuxError::ParticipantTimeout { client: id };
            tracing::warn!(client = %id, discarded = dropped, error = %err, "participant timed out");
            report.timed_out.push(id);
        }

        run_reset(&mut self.host, &self.opts.reset);

        for &id in &report.participants {
            if !completed.contains(&id) {
                continue;
            }
            let Some(proxy) = self.registry.get_mut(id) else {
                continue;
            };
            let rejected_before = proxy.stats().rejected;
            report.commands_replayed += proxy.execute_frame_commands(&mut self.host);
            self.stats.rejected += proxy.stats().rejected - rejected_before;
            report.replayed.push(id);
        }

        self.stats.cycles += 1;
        self.stats.commands_replayed += report.commands_replayed as u64;
        self.stats.timeouts += report.timed_out.len() as u64;
        tracing::debug!(
            participants = report.participants.len(),
            replayed = report.replayed.len(),
            timed_out = report.timed_out.len(),
            commands = report.commands_replayed,
            "cycle complete"
        );
        report
    }

    /// Run cycles paced by the frame interval until shutdown, until every bus sender is
    /// dropped, or until `max_cycles` cycles have run.
    pub async fn run_until(&mut self, max_cycles: Option<u64>) -> MuxStats {
        let start = Instant::now() + self.opts.start_delay();
        let mut ticks = tokio::time::interval_at(start, self.opts.frame_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            capacity = self.opts.capacity,
            interval_ms = self.opts.frame_interval_ms,
            timeout_ms = self.opts.frame_timeout_ms,
            "multiplexer started"
        );

        // Ticks are polled before the bus. Queued events are applied up to a fixed budget
        // before each cycle.
        let mut ran = 0u64;
        while !self.is_stopped() && max_cycles.is_none_or(|max| ran < max) {
            tokio::select! {
                biased;
                _ = ticks.tick() => {
                    self.pump_at_most(EVENTS_PER_TICK);
                    if self.is_stopped() {
                        break;
                    }
                    self.run_cycle().await;
                    ran += 1;
                }
                ev = self.events.recv() => match ev {
                    Some(ev) => {
                        self.handle_event(ev);
                    }
                    None => self.bus_closed = true,
                },
            }
        }

        tracing::info!(
            cycles = self.stats.cycles,
            clients = self.registry.len(),
            "multiplexer stopped"
        );
        self.stats
    }

    /// Run until shutdown or until every bus sender is dropped.
    pub async fn run(&mut self) -> MuxStats {
        self.run_until(None).await
    }
}
