//! Client target: connection actor and public control surface
//!
//! An [`AvrClient`] spawns one actor task owning the socket, the variable
//! registry and the pending-call list. Callers talk to the actor over an
//! mpsc command channel with oneshot replies; notifications fan out on a
//! broadcast channel. The actor reconnects on its own with a fixed backoff
//! and keeps the connection alive with the scheme's pulse.

use crate::engine::{Engine, Role};
use crate::error::{AvrError, Result};
use crate::pending::{PendingAction, MAX_CALL_DELAY};
use crate::registry::{VarId, VarRegistry};
use crate::schemes::{parse_uri, Scheme};
use crate::subscription::{EventReceiver, VarEvent};
use crate::transport::{
    write_line, LineFramer, CONNECT_TIMEOUT, MAX_PENDING_PULSES, PULSE_INTERVAL,
};
use crate::value::Value;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

/// Cadence of pending-call expiry and default-value checks
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);
/// How long `connect()` waits for the first connection
const FIRST_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ScheduledFn = Box<dyn FnOnce(&VarRegistry) + Send>;

enum Command {
    Get {
        id: String,
        reply: oneshot::Sender<Result<Option<Value>>>,
    },
    RemoteSet {
        id: String,
        value: Value,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Poll {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    WaitFor {
        ids: Vec<String>,
        deadline: Duration,
        reply: oneshot::Sender<Result<oneshot::Receiver<()>>>,
    },
    Schedule {
        ids: Vec<String>,
        f: ScheduledFn,
        reply: oneshot::Sender<Result<()>>,
    },
    SendRaw {
        line: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        reply: oneshot::Sender<EventReceiver>,
    },
    Disconnect,
    Shutdown,
}

/// Client endpoint of the protocol
pub struct AvrClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    connected_rx: watch::Receiver<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AvrClient {
    /// Create a client and start connecting in the background.
    ///
    /// The actor keeps reconnecting with the fixed backoff until the
    /// client is shut down.
    pub fn new(scheme: Box<dyn Scheme>, host: impl Into<String>, port: u16) -> Self {
        let registry = VarRegistry::new(scheme.variables());
        let preload = scheme
            .preload()
            .iter()
            .filter_map(|id| registry.lookup(id).ok())
            .collect();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(100);
        let (connected_tx, connected_rx) = watch::channel(false);
        let actor = ClientActor {
            host: host.into(),
            port,
            pulse: scheme.pulse(),
            engine: Engine::new(registry, Role::Client, preload),
            cmd_rx,
            events_tx,
            connected_tx,
            reconnects: 0,
            pending_pulses: 0,
        };
        let task = tokio::spawn(actor.run());
        Self {
            cmd_tx,
            connected_rx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Create a client and wait for the first connection
    pub async fn connect(
        scheme: Box<dyn Scheme>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        let client = Self::new(scheme, host, port);
        client.wait_connected(FIRST_CONNECT_TIMEOUT).await?;
        Ok(client)
    }

    /// Create a client from a `scheme://host:port` address
    pub async fn connect_uri(uri: &str) -> Result<Self> {
        let (scheme, host, port) = parse_uri(uri)?;
        Self::connect(scheme, host, port).await
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Wait until the transport reports connected
    pub async fn wait_connected(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.connected_rx.clone();
        timeout(deadline, async move {
            while !*rx.borrow_and_update() {
                rx.changed().await.map_err(|_| AvrError::ConnectionClosed)?;
            }
            Ok(())
        })
        .await
        .map_err(|_| AvrError::Timeout)?
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| AvrError::ConnectionClosed)
    }

    async fn reply<T>(&self, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        rx.await.map_err(|_| AvrError::ConnectionClosed)?
    }

    /// The cached value of a variable; `None` means unknown/not yet polled
    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Get {
            id: id.to_string(),
            reply: tx,
        })?;
        self.reply(rx).await
    }

    /// Get a value, polling and waiting for it if unknown
    pub async fn get_wait(&self, id: &str) -> Result<Value> {
        self.wait_for(&[id], MAX_CALL_DELAY).await?;
        self.get(id).await?.ok_or(AvrError::Timeout)
    }

    /// Request a value update on the receiver
    pub async fn remote_set(&self, id: &str, value: impl Into<Value>) -> Result<()> {
        self.remote_set_inner(id, value.into(), false).await
    }

    /// Like [`remote_set`](Self::remote_set), bypassing the range/options
    /// check (the type check still applies)
    pub async fn remote_set_forced(&self, id: &str, value: impl Into<Value>) -> Result<()> {
        self.remote_set_inner(id, value.into(), true).await
    }

    async fn remote_set_inner(&self, id: &str, value: Value, force: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::RemoteSet {
            id: id.to_string(),
            value,
            force,
            reply: tx,
        })?;
        self.reply(rx).await
    }

    /// Trigger a poll for a variable
    pub async fn poll(&self, id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Poll {
            id: id.to_string(),
            reply: tx,
        })?;
        self.reply(rx).await
    }

    /// Wait until all listed variables are set, polling the missing ones.
    ///
    /// Returns `Err(Timeout)` when the deadline elapses; the caller's
    /// task is suspended, never the connection actor.
    pub async fn wait_for(&self, ids: &[&str], deadline: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::WaitFor {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            deadline,
            reply: tx,
        })?;
        let notified = self.reply(rx).await?;
        match timeout(deadline + Duration::from_millis(100), notified).await {
            Ok(Ok(())) => Ok(()),
            // The pending call expired or the target went away
            Ok(Err(_)) | Err(_) => Err(AvrError::Timeout),
        }
    }

    /// Run `f` once all listed variables are set, polling the missing
    /// ones. The call is dropped unrun if the values do not arrive within
    /// the standard delay.
    pub async fn schedule<F>(&self, ids: &[&str], f: F) -> Result<()>
    where
        F: FnOnce(&VarRegistry) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Schedule {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            f: Box::new(f),
            reply: tx,
        })?;
        self.reply(rx).await
    }

    /// Send a raw protocol line
    pub async fn send(&self, line: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::SendRaw {
            line: line.to_string(),
            reply: tx,
        })?;
        self.reply(rx).await
    }

    /// Subscribe to target events; the receiver first replays the current
    /// state of every variable, then yields live events
    pub async fn subscribe(&self) -> Result<EventReceiver> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscribe { reply: tx })?;
        rx.await.map_err(|_| AvrError::ConnectionClosed)
    }

    /// Drop the current connection; the backoff machine reconnects
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Stop the actor and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let task = self.task.lock().expect("task handle lock").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

struct ClientActor {
    host: String,
    port: u16,
    pulse: Option<String>,
    engine: Engine,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: broadcast::Sender<VarEvent>,
    connected_tx: watch::Sender<bool>,
    /// Consecutive connection failures, indexing the backoff table
    reconnects: u32,
    /// Pulses sent since the last inbound line
    pending_pulses: u32,
}

impl ClientActor {
    async fn run(mut self) {
        loop {
            let delay = crate::transport::reconnect_delay(self.reconnects);
            if !delay.is_zero() {
                tracing::info!("connecting to {}:{} in {:?}", self.host, self.port, delay);
            }
            if self.idle_wait(delay).await {
                return;
            }
            let connect = TcpStream::connect((self.host.as_str(), self.port));
            let stream = match timeout(CONNECT_TIMEOUT, connect).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!("connect to {}:{} failed: {}", self.host, self.port, e);
                    self.reconnects += 1;
                    continue;
                }
                Err(_) => {
                    tracing::warn!("connect to {}:{} timed out", self.host, self.port);
                    self.reconnects += 1;
                    continue;
                }
            };

            tracing::info!("connected to {}:{}", self.host, self.port);
            self.pending_pulses = 0;
            let _ = self.connected_tx.send(true);
            self.engine.on_connected();
            let end = self.session(stream).await;

            let _ = self.connected_tx.send(false);
            self.engine.on_disconnected();
            self.publish_events();
            tracing::info!("disconnected from {}:{}", self.host, self.port);
            if matches!(end, SessionEnd::Shutdown) {
                return;
            }
        }
    }

    /// Serve commands while disconnected; true means shutdown
    async fn idle_wait(&mut self, delay: Duration) -> bool {
        let wake = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => return true,
                    Some(cmd) => self.handle_cmd_disconnected(cmd),
                },
                _ = tokio::time::sleep_until(wake) => return false,
            }
        }
    }

    fn handle_cmd_disconnected(&mut self, cmd: Command) {
        match cmd {
            Command::Get { id, reply } => {
                let _ = reply.send(self.lookup_value(&id));
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.subscriber(false));
            }
            // A deferred call is dropped right away when polling its
            // variables is impossible
            Command::WaitFor { reply, .. } => {
                let _ = reply.send(Err(AvrError::NotConnected));
            }
            Command::Schedule { reply, .. } => {
                let _ = reply.send(Err(AvrError::NotConnected));
            }
            Command::RemoteSet { reply, .. } => {
                let _ = reply.send(Err(AvrError::NotConnected));
            }
            Command::Poll { reply, .. } => {
                let _ = reply.send(Err(AvrError::NotConnected));
            }
            Command::SendRaw { reply, .. } => {
                let _ = reply.send(Err(AvrError::NotConnected));
            }
            Command::Disconnect | Command::Shutdown => {}
        }
    }

    async fn session(&mut self, stream: TcpStream) -> SessionEnd {
        let (mut reader, mut writer) = stream.into_split();
        let mut framer = LineFramer::new();
        let mut read_buf = [0u8; 1024];
        let mut pulse_tick = interval(PULSE_INTERVAL);
        let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);

        loop {
            if self.flush(&mut writer).await.is_err() {
                return SessionEnd::Lost;
            }
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Shutdown) => return SessionEnd::Shutdown,
                        Some(Command::Disconnect) => return SessionEnd::Lost,
                        Some(cmd) => {
                            if self.handle_cmd_connected(cmd, &mut writer).await.is_err() {
                                return SessionEnd::Lost;
                            }
                        }
                    }
                }
                read = reader.read(&mut read_buf) => {
                    match read {
                        Ok(0) => return SessionEnd::Lost,
                        Err(e) => {
                            tracing::warn!("read failed: {}", e);
                            return SessionEnd::Lost;
                        }
                        Ok(n) => {
                            for line in framer.push(&read_buf[..n]) {
                                tracing::debug!("recv: {:?}", line);
                                self.pending_pulses = 0;
                                self.reconnects = 0;
                                self.engine.handle_line(&line);
                            }
                        }
                    }
                }
                _ = pulse_tick.tick(), if self.pulse.is_some() => {
                    let exhausted = self.record_pulse();
                    let pulse = self.pulse.clone().unwrap_or_default();
                    if write_line(&mut writer, &pulse).await.is_err() {
                        return SessionEnd::Lost;
                    }
                    if exhausted {
                        tracing::warn!("pulse timed out, reconnecting");
                        self.reconnects += 1;
                        return SessionEnd::Lost;
                    }
                }
                _ = housekeeping.tick() => self.engine.check_timers(),
            }
        }
    }

    /// Count a pulse about to go out; true once the link counts as dead
    fn record_pulse(&mut self) -> bool {
        self.pending_pulses += 1;
        self.pending_pulses > MAX_PENDING_PULSES
    }

    /// Transmit queued lines and publish queued events
    async fn flush(&mut self, writer: &mut OwnedWriteHalf) -> std::io::Result<()> {
        for line in self.engine.take_out() {
            write_line(writer, &line).await?;
        }
        self.publish_events();
        Ok(())
    }

    fn publish_events(&mut self) {
        for event in self.engine.take_events() {
            let _ = self.events_tx.send(event);
        }
    }

    async fn handle_cmd_connected(
        &mut self,
        cmd: Command,
        writer: &mut OwnedWriteHalf,
    ) -> std::io::Result<()> {
        match cmd {
            Command::Get { id, reply } => {
                let _ = reply.send(self.lookup_value(&id));
            }
            Command::RemoteSet {
                id,
                value,
                force,
                reply,
            } => {
                let result = self
                    .engine
                    .registry
                    .lookup(&id)
                    .and_then(|vid| self.engine.remote_set(vid, value, force));
                let _ = reply.send(result);
            }
            Command::Poll { id, reply } => {
                let result = self.engine.registry.lookup(&id).map(|vid| {
                    self.engine.poll_var(vid);
                });
                let _ = reply.send(result);
            }
            Command::WaitFor {
                ids,
                deadline,
                reply,
            } => match self.resolve(&ids) {
                Ok(vids) => {
                    let (tx, rx) = oneshot::channel();
                    self.engine
                        .schedule("wait_for", vids, PendingAction::Notify(tx), Some(deadline));
                    self.engine.evaluate_pending();
                    let _ = reply.send(Ok(rx));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Schedule { ids, f, reply } => match self.resolve(&ids) {
                Ok(vids) => {
                    self.engine.schedule(
                        "scheduled call",
                        vids,
                        PendingAction::Run(Box::new(move |engine: &mut Engine| {
                            f(&engine.registry)
                        })),
                        Some(MAX_CALL_DELAY),
                    );
                    self.engine.evaluate_pending();
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::SendRaw { line, reply } => {
                let result = write_line(writer, &line).await;
                let failed = result.is_err();
                let _ = reply.send(result.map_err(AvrError::Io));
                if failed {
                    return Err(std::io::Error::other("write failed"));
                }
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.subscriber(true));
            }
            Command::Disconnect | Command::Shutdown => unreachable!("handled by session loop"),
        }
        Ok(())
    }

    fn resolve(&self, ids: &[String]) -> Result<Vec<VarId>> {
        ids.iter().map(|id| self.engine.registry.lookup(id)).collect()
    }

    fn lookup_value(&self, id: &str) -> Result<Option<Value>> {
        let vid = self.engine.registry.lookup(id)?;
        Ok(self.engine.registry.get(vid).value().cloned())
    }

    fn subscriber(&self, connected: bool) -> EventReceiver {
        let mut replay = vec![if connected {
            VarEvent::Connected
        } else {
            VarEvent::Disconnected
        }];
        replay.extend(self.engine.snapshot());
        EventReceiver::new(replay, self.events_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ClientActor {
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(8);
        let (connected_tx, _connected_rx) = watch::channel(false);
        ClientActor {
            host: "127.0.0.1".to_string(),
            port: 0,
            pulse: Some("PW?".to_string()),
            engine: Engine::new(VarRegistry::new(Vec::new()), Role::Client, Vec::new()),
            cmd_rx,
            events_tx,
            connected_tx,
            reconnects: 0,
            pending_pulses: 0,
        }
    }

    #[test]
    fn third_unanswered_pulse_kills_the_link() {
        let mut actor = actor();
        // Two pulses may go unanswered; the third one ends the session
        assert!(!actor.record_pulse());
        assert!(!actor.record_pulse());
        assert!(actor.record_pulse());

        // An inbound line resets the budget
        actor.pending_pulses = 0;
        assert!(!actor.record_pulse());
    }
}
