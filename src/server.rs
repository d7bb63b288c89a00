//! Server target: answers polls and applies client-issued sets
//!
//! An [`AvrServer`] listens on TCP and drives the same engine as the
//! client, in the server role: inbound poll commands are answered from the
//! variable cache (fabricating a plausible dummy value when none is
//! known), inbound set commands are validated, applied and confirmed.
//! With no real device attached this is the in-process emulated receiver
//! used for local testing; a device integration drives values through
//! [`AvrServer::set`].

use crate::engine::{Engine, Role};
use crate::error::Result;
use crate::registry::VarRegistry;
use crate::schemes::Scheme;
use crate::subscription::{EventReceiver, VarEvent};
use crate::transport::{write_line, LineFramer};
use crate::value::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);

/// Server endpoint of the protocol
pub struct AvrServer {
    engine: Arc<Mutex<Engine>>,
    lines_tx: broadcast::Sender<String>,
    events_tx: broadcast::Sender<VarEvent>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AvrServer {
    /// Bind a server for `scheme` on `addr` (e.g. `127.0.0.1:0`)
    pub async fn bind(scheme: Box<dyn Scheme>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("{} server operating on {}", scheme.name(), local_addr);

        let registry = VarRegistry::new(scheme.variables());
        let engine = Arc::new(Mutex::new(Engine::new(registry, Role::Server, Vec::new())));
        let (lines_tx, _) = broadcast::channel(256);
        let (events_tx, _) = broadcast::channel(100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(
            listener,
            engine.clone(),
            lines_tx.clone(),
            events_tx.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            engine,
            lines_tx,
            events_tx,
            local_addr,
            shutdown_tx,
            task: std::sync::Mutex::new(Some(task)),
        })
    }

    /// The address the server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Apply a locally computed value (device readout or simulation) and
    /// refresh every connected client
    pub async fn set(&self, id: &str, value: impl Into<Value>) -> Result<()> {
        let mut engine = self.engine.lock().await;
        let vid = engine.registry.lookup(id)?;
        engine.set_local(vid, value.into())?;
        drain(&mut engine, &self.lines_tx, &self.events_tx);
        Ok(())
    }

    /// The server's cached value for a variable
    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        let engine = self.engine.lock().await;
        let vid = engine.registry.lookup(id)?;
        Ok(engine.registry.get(vid).value().cloned())
    }

    /// Subscribe to server events, replaying the current variable state
    pub async fn subscribe(&self) -> EventReceiver {
        let engine = self.engine.lock().await;
        EventReceiver::new(engine.snapshot(), self.events_tx.subscribe())
    }

    /// Stop listening and wait for the accept loop to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("task handle lock").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Push the engine's queued lines to every connection and publish events
fn drain(
    engine: &mut Engine,
    lines_tx: &broadcast::Sender<String>,
    events_tx: &broadcast::Sender<VarEvent>,
) {
    for line in engine.take_out() {
        let _ = lines_tx.send(line);
    }
    for event in engine.take_events() {
        let _ = events_tx.send(event);
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Mutex<Engine>>,
    lines_tx: broadcast::Sender<String>,
    events_tx: broadcast::Sender<VarEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!("client connected from {}", peer);
                    tokio::spawn(serve_connection(
                        stream,
                        engine.clone(),
                        lines_tx.clone(),
                        events_tx.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            },
            _ = housekeeping.tick() => {
                let mut engine = engine.lock().await;
                engine.check_timers();
                drain(&mut engine, &lines_tx, &events_tx);
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    engine: Arc<Mutex<Engine>>,
    lines_tx: broadcast::Sender<String>,
    events_tx: broadcast::Sender<VarEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut outbound = lines_tx.subscribe();
    let mut framer = LineFramer::new();
    let mut read_buf = [0u8; 1024];

    loop {
        tokio::select! {
            read = reader.read(&mut read_buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let lines = framer.push(&read_buf[..n]);
                    if lines.is_empty() {
                        continue;
                    }
                    let mut engine = engine.lock().await;
                    for line in lines {
                        tracing::debug!("recv: {:?}", line);
                        engine.handle_line(&line);
                    }
                    drain(&mut engine, &lines_tx, &events_tx);
                }
            },
            line = outbound.recv() => match line {
                Ok(line) => {
                    if write_line(&mut writer, &line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("connection lagged by {} lines", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }
    tracing::info!("client disconnected");
}
