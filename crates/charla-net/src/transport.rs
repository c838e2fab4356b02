//! Socket ownership and line delivery.
//!
//! A [`Transport`] wraps exactly one TCP connection. A dedicated tokio task
//! reads lines for the lifetime of the connection and fans each one out to
//! every registered listener, in arrival order. Listeners are unbounded mpsc
//! senders, so a slow consumer buffers instead of stalling delivery to the
//! others; heavy work (database writes) belongs on the consuming side.
//!
//! Closure and read errors are delivered to all listeners exactly once, the
//! registry is cleared, and the socket is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::error::{NetError, Result};

/// What a listener observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound line, unmodified (without its terminator).
    Line(String),
    /// The connection closed (locally or by the server). Terminal.
    Closed,
    /// The read loop hit an I/O error. Terminal.
    Errored(String),
}

/// Handle for deregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    listeners: std::sync::Mutex<Vec<(ListenerId, mpsc::UnboundedSender<TransportEvent>)>>,
    next_id: AtomicU64,
    /// Set once a terminal event has been delivered.
    terminated: AtomicBool,
}

impl Registry {
    fn add(&self) -> (ListenerId, mpsc::UnboundedReceiver<TransportEvent>) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        // The terminated check must happen under the listeners lock:
        // `terminate` sets the flag and clears the list in the same
        // critical section, so a registration cannot slip in between and
        // miss the terminal event.
        let mut listeners = self.listeners.lock().expect("registry lock");
        if self.terminated.load(Ordering::Acquire) {
            // Late registration on a dead transport: resolve immediately
            // instead of hanging forever.
            let _ = tx.send(TransportEvent::Closed);
        } else {
            listeners.push((id, tx));
        }
        (id, rx)
    }

    fn remove(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("registry lock")
            .retain(|(lid, _)| *lid != id);
    }

    fn count(&self) -> usize {
        self.listeners.lock().expect("registry lock").len()
    }

    /// Deliver one event to every listener, pruning dropped receivers.
    fn deliver(&self, event: &TransportEvent) {
        self.listeners
            .lock()
            .expect("registry lock")
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Deliver a terminal event exactly once, then release all listeners.
    fn terminate(&self, event: TransportEvent) {
        let mut listeners = self.listeners.lock().expect("registry lock");
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, tx) in listeners.iter() {
            let _ = tx.send(event.clone());
        }
        listeners.clear();
    }
}

/// One long-lived connection to the chat server.
pub struct Transport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    registry: Arc<Registry>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Transport {
    /// Open exactly one connection, bounded by the connect timeout, and
    /// start the read loop.
    pub async fn connect(config: &NetConfig) -> Result<Self> {
        let addr = config.addr();
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetError::ConnectTimeout(config.connect_timeout))?
            .map_err(NetError::Connect)?;

        info!(addr = %addr, "Connected");

        let (read_half, write_half) = stream.into_split();
        let registry = Arc::new(Registry::default());
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(read_loop(
            read_half,
            registry.clone(),
            connected.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            writer: Mutex::new(Some(write_half)),
            registry,
            connected,
            shutdown,
        })
    }

    /// Cheap non-blocking connection check.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Write one line plus its terminator, flushing before returning.
    ///
    /// Concurrent senders serialize on the writer lock, so lines never
    /// interleave. A failure here is surfaced, not retried.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        if line.contains('\n') {
            return Err(NetError::InvalidLine);
        }
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        debug!(len = line.len(), "Line sent");
        Ok(())
    }

    /// Register a listener. Every inbound line is delivered to every
    /// registered listener; a terminal `Closed` / `Errored` event is the
    /// last thing a listener sees.
    pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<TransportEvent>) {
        self.registry.add()
    }

    /// Deregister a listener. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.registry.remove(id);
    }

    /// Number of currently registered listeners (used by leak checks).
    pub fn listener_count(&self) -> usize {
        self.registry.count()
    }

    /// Close the connection: stops the read loop, notifies all listeners of
    /// closure, and releases both socket halves.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.shutdown.notify_one();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    registry: Arc<Registry>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut lines = BufReader::new(read_half).lines();

    let terminal = loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("Read loop shutdown requested");
                break TransportEvent::Closed;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(len = line.len(), "Line received");
                    registry.deliver(&TransportEvent::Line(line));
                }
                Ok(None) => {
                    info!("Server closed the connection");
                    break TransportEvent::Closed;
                }
                Err(e) => {
                    warn!(error = %e, "Read loop error");
                    break TransportEvent::Errored(e.to_string());
                }
            }
        }
    };

    connected.store(false, Ordering::Release);
    registry.terminate(terminal);
    debug!("Read loop terminated");
}
