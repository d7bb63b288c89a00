//! Synchronization engine shared by the client and server roles
//!
//! The engine owns the variable registry and the pending-call list and is
//! driven single-threaded by its target's actor task: inbound lines go in,
//! outbound lines and events come out. Keeping it free of sockets makes
//! the whole poll/consume/notify protocol testable in isolation.

use crate::error::Result;
use crate::pending::{PendingAction, PendingCall, MAX_CALL_DELAY};
use crate::registry::{VarId, VarRegistry};
use crate::subscription::VarEvent;
use crate::value::Value;
use crate::variable::Access;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Which side of the protocol this engine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub struct Engine {
    pub registry: VarRegistry,
    role: Role,
    pending: Vec<PendingCall>,
    /// Variables polled on every (re)connect
    preload: Vec<VarId>,
    /// Accumulation buffers for multi-line block bursts (client role)
    block_buffers: HashMap<VarId, Vec<String>>,
    /// Lines to transmit, drained by the owning target
    out: Vec<String>,
    /// Notifications to publish, drained by the owning target
    events: Vec<VarEvent>,
}

impl Engine {
    pub fn new(registry: VarRegistry, role: Role, preload: Vec<VarId>) -> Self {
        Self {
            registry,
            role,
            pending: Vec::new(),
            preload,
            block_buffers: HashMap::new(),
            out: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Drain the lines queued for transmission
    pub fn take_out(&mut self) -> Vec<String> {
        std::mem::take(&mut self.out)
    }

    /// Drain the queued notifications
    pub fn take_events(&mut self) -> Vec<VarEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn send_line(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }

    /// Dispatch one inbound line to the matching variables
    pub fn handle_line(&mut self, line: &str) {
        self.events.push(VarEvent::Line {
            raw: line.to_string(),
        });

        if self.role == Role::Server {
            if let Some(id) = self.registry.polled_by(line) {
                self.serve_poll(id);
                self.evaluate_pending();
                return;
            }
        }

        if self.role == Role::Client {
            if let Some(block) = self.registry.matching_block(line) {
                self.block_consume(block, line);
                self.evaluate_pending();
                return;
            }
        }

        let matching = self.registry.matching(line);
        if matching.is_empty() {
            tracing::debug!("unparsed line: {:?}", line);
            return;
        }
        for id in matching {
            let discard_partial = self.role == Role::Server;
            let decoded = self.registry.get_mut(id).consume(line, discard_partial);
            if let Some(value) = decoded {
                match self.role {
                    Role::Client => self.apply_set(id, value),
                    Role::Server => self.serve_set(id, value),
                }
            }
        }
        self.evaluate_pending();
    }

    /// Validate, store and notify; the set path for confirmed values
    fn apply_set(&mut self, id: VarId, value: Value) {
        if let Err(e) = self.set_value(id, value) {
            tracing::warn!("rejected value: {}", e);
        }
    }

    /// Validate and store a value, emitting the change notifications
    pub fn set_value(&mut self, id: VarId, value: Value) -> Result<()> {
        let var = self.registry.get_mut(id);
        if let Some(outcome) = var.set(value)? {
            let vid = var.id().to_string();
            if outcome.changed {
                self.events.push(VarEvent::Changed {
                    id: vid.clone(),
                    value: outcome.value.clone(),
                });
            }
            if outcome.first_set {
                self.events.push(VarEvent::Set {
                    id: vid.clone(),
                    value: outcome.value.clone(),
                });
            }
            self.events.push(VarEvent::Processed {
                id: vid,
                value: outcome.value,
            });
        }
        Ok(())
    }

    /// Server-side applied value, driven by a real device or a simulation:
    /// store, notify, and proactively refresh the connected clients.
    pub fn set_local(&mut self, id: VarId, value: Value) -> Result<()> {
        self.set_value(id, value)?;
        if self.role == Role::Server {
            match self.block_parent_of(id) {
                Some(parent) => self.resend_block(parent),
                None => {
                    let var = self.registry.get(id);
                    if var.def.access != Access::WriteOnly {
                        if let Some(lines) = var.encode_resend() {
                            self.out.extend(lines);
                        }
                    }
                }
            }
        }
        self.evaluate_pending();
        Ok(())
    }

    fn block_parent_of(&self, id: VarId) -> Option<VarId> {
        self.registry
            .parent_of(id)
            .filter(|p| self.registry.get(*p).def.is_block())
    }

    /// Server side of an inbound set request: apply, then confirm on the
    /// wire (write-only variables are applied silently).
    fn serve_set(&mut self, id: VarId, value: Value) {
        self.apply_set(id, value.clone());
        // A block child is confirmed with the whole batch; a bare child
        // line would sit in the peer's accumulator with no sentinel
        if let Some(parent) = self.block_parent_of(id) {
            self.resend_block(parent);
            return;
        }
        let var = self.registry.get(id);
        if var.def.access != Access::WriteOnly {
            self.out.extend(var.def.codec.serialize(&value));
        }
    }

    /// Server side of an inbound poll: answer from the cache, fabricating
    /// a plausible value first when none is known.
    fn serve_poll(&mut self, id: VarId) {
        if self.registry.get(id).def.is_block() {
            self.resend_block(id);
            return;
        }
        self.ensure_server_value(id);
        if let Some(lines) = self.registry.get(id).encode_resend() {
            self.out.extend(lines);
        }
    }

    /// Compute a variable's value locally, without emitting it: the
    /// declared dummy, else the default, else the kind's fabricated value.
    fn ensure_server_value(&mut self, id: VarId) {
        if self.registry.get(id).is_set() {
            return;
        }
        let def = &self.registry.get(id).def;
        let value = def
            .dummy_value
            .clone()
            .or_else(|| def.default_value.clone())
            .unwrap_or_else(|| def.kind.dummy_value());
        self.apply_set(id, value);
    }

    /// Trigger a poll for a variable
    ///
    /// On the client this sends the poll command (block children poll their
    /// parent block) and arms the default-value deadline; on the server it
    /// computes the value locally.
    pub fn poll_var(&mut self, id: VarId) {
        if self.role == Role::Server {
            self.ensure_server_value(id);
            return;
        }
        let target = self.registry.parent_of(id).unwrap_or(id);
        let var = self.registry.get_mut(target);
        if matches!(var.def.access, Access::WriteOnly | Access::Constant) {
            return;
        }
        if var.def.default_value.is_some() {
            var.default_deadline = Some(Instant::now() + MAX_CALL_DELAY);
        }
        if let Some(cmd) = var.def.codec.poll_cmd() {
            self.out.push(cmd);
        }
    }

    /// Defer `action` until all `required` variables are set, polling the
    /// missing ones now. The call expires after `timeout` if given.
    pub fn schedule(
        &mut self,
        label: &'static str,
        required: Vec<VarId>,
        action: PendingAction,
        timeout: Option<Duration>,
    ) {
        for id in &required {
            if !self.registry.get(*id).is_set() {
                self.poll_var(*id);
            }
        }
        self.pending.push(PendingCall::new(label, required, action, timeout));
    }

    /// Invoke every pending call whose variables are all available.
    ///
    /// Each call invokes at most once; calls whose action was already taken
    /// are dropped. Actions run with full engine access and may queue lines
    /// or schedule further calls.
    pub fn evaluate_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let mut keep = Vec::new();
        for mut call in pending {
            if call.action.is_none() {
                continue;
            }
            let ready = call
                .required
                .iter()
                .all(|id| self.registry.get(*id).is_set());
            if !ready {
                keep.push(call);
                continue;
            }
            tracing::debug!("invoking pending call `{}`", call.label);
            match call.action.take() {
                Some(PendingAction::Notify(tx)) => {
                    let _ = tx.send(());
                }
                Some(PendingAction::Run(f)) => {
                    // A failing callback must not take the dispatch loop down
                    let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self)));
                    if run.is_err() {
                        tracing::error!("pending call `{}` panicked", call.label);
                    }
                }
                None => {}
            }
        }
        // Actions may have scheduled new calls in the meantime
        self.pending.extend(keep);
    }

    /// Housekeeping: expire pending calls and apply default values whose
    /// poll went unanswered. Called periodically by the target.
    pub fn check_timers(&mut self) {
        let now = Instant::now();
        let mut cleanups = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        self.pending = pending
            .into_iter()
            .filter_map(|mut call| {
                if call.expired(now) {
                    tracing::warn!("pending call `{}` expired", call.label);
                    cleanups.extend(call.cleanup.take());
                    None
                } else {
                    Some(call)
                }
            })
            .collect();
        for cleanup in cleanups {
            cleanup(self);
        }

        let mut defaults = Vec::new();
        for id in self.registry.ids().collect::<Vec<_>>() {
            let var = self.registry.get_mut(id);
            if var
                .default_deadline
                .is_some_and(|deadline| deadline <= now)
            {
                var.default_deadline = None;
                if !var.is_set() {
                    if let Some(value) = var.def.default_value.clone() {
                        defaults.push((id, value));
                    }
                }
            }
        }
        for (id, value) in defaults {
            tracing::debug!(
                id = %self.registry.get(id).id(),
                "no answer to poll, applying default value"
            );
            self.apply_set(id, value);
        }
        self.evaluate_pending();
    }

    /// (Re)connect bookkeeping: stale state is never presented as live.
    ///
    /// Unsets every variable, replays preload polls, and re-polls the
    /// missing variables of calls that survived a disconnect.
    pub fn on_connected(&mut self) {
        self.events.push(VarEvent::Connected);
        self.unset_all();
        for id in self.preload.clone() {
            self.poll_var(id);
        }
        let missing: Vec<VarId> = self
            .pending
            .iter()
            .filter(|c| c.action.is_some())
            .flat_map(|c| c.required.iter().copied())
            .filter(|id| !self.registry.get(*id).is_set())
            .collect();
        for id in missing {
            self.poll_var(id);
        }
    }

    /// Disconnect bookkeeping; pending calls are kept and only disappear
    /// via invocation or expiry.
    pub fn on_disconnected(&mut self) {
        self.events.push(VarEvent::Disconnected);
        self.unset_all();
        self.out.clear();
    }

    fn unset_all(&mut self) {
        self.block_buffers.clear();
        for id in self.registry.ids().collect::<Vec<_>>() {
            let var = self.registry.get_mut(id);
            var.resending = false;
            if var.unset() {
                self.events.push(VarEvent::Unset {
                    id: var.id().to_string(),
                });
            }
        }
    }

    /// Encode a remote-set request and queue it for transmission
    pub fn remote_set(&mut self, id: VarId, value: Value, force: bool) -> Result<()> {
        if let Some(lines) = self.registry.get_mut(id).encode_remote_set(value, force)? {
            self.events.push(VarEvent::Sent {
                id: self.registry.get(id).id().to_string(),
            });
            self.out.extend(lines);
        }
        Ok(())
    }

    /// Accumulate one line of a block burst; on the sentinel, decode every
    /// buffered line before any child fires its set notification.
    fn block_consume(&mut self, block: VarId, line: &str) {
        let sentinel = self.registry.get(block).def.sentinel.clone();
        if sentinel.as_deref() != Some(line) {
            self.block_buffers
                .entry(block)
                .or_default()
                .push(line.to_string());
            return;
        }
        let buffered = self.block_buffers.remove(&block).unwrap_or_default();
        let children = self.registry.children_of(block);
        let mut decoded = Vec::new();
        for burst_line in &buffered {
            let child = children
                .iter()
                .copied()
                .find(|c| self.registry.get(*c).def.codec.matches(burst_line));
            match child {
                Some(c) => {
                    if let Some(value) = self.registry.get_mut(c).consume(burst_line, false) {
                        decoded.push((c, value));
                    }
                }
                None => tracing::debug!("unparsed block line: {:?}", burst_line),
            }
        }
        for (child, value) in decoded {
            self.apply_set(child, value);
        }
    }

    /// Re-emit a whole block: wait for every child value via the pending
    /// mechanism, then send one line per child followed by the sentinel.
    /// Guarded against recursive resends while the batch poll is pending.
    fn resend_block(&mut self, block: VarId) {
        if self.registry.get(block).resending {
            return;
        }
        self.registry.get_mut(block).resending = true;
        let children = self.registry.children_of(block);
        for child in &children {
            if !self.registry.get(*child).is_set() {
                self.poll_var(*child);
            }
        }
        let batch = children.clone();
        self.pending.push(
            PendingCall::new(
                "block resend",
                children,
                PendingAction::Run(Box::new(move |engine: &mut Engine| {
                    for child in &batch {
                        if let Some(lines) = engine.registry.get(*child).encode_resend() {
                            engine.out.extend(lines);
                        }
                    }
                    if let Some(sentinel) = engine.registry.get(block).def.sentinel.clone() {
                        engine.out.push(sentinel);
                    }
                    engine.registry.get_mut(block).resending = false;
                })),
                Some(MAX_CALL_DELAY),
            )
            // An expired batch releases the guard too
            .on_expire(move |engine| {
                engine.registry.get_mut(block).resending = false;
            }),
        );
    }

    /// Replay of the current variable state, for new subscribers
    pub fn snapshot(&self) -> Vec<VarEvent> {
        self.registry
            .iter()
            .filter(|(_, var)| !var.def.is_block() && var.def.access != Access::WriteOnly)
            .map(|(_, var)| match var.value() {
                Some(value) => VarEvent::Set {
                    id: var.id().to_string(),
                    value: value.clone(),
                },
                None => VarEvent::Unset {
                    id: var.id().to_string(),
                },
            })
            .collect()
    }
}
