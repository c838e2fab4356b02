//! Event ingestion: from inbound lines to deduplicated history.
//!
//! Two tasks per connection, shaped as a notification loop feeding
//! application state:
//!
//! - the *classifier* is a transport listener; it parses each line, asks
//!   [`Push::classify`] what it is, routes terminal events straight to the
//!   bus, and forwards message work over a bounded channel;
//! - the *worker* drains that channel, runs the store merge under
//!   [`tokio::task::spawn_blocking`] (rusqlite is synchronous; a slow disk
//!   must never starve the read loop), and publishes one bus notification
//!   per changed conversation.
//!
//! A persistence failure drops that single message and continues; it never
//! takes either task down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use charla_net::{Transport, TransportEvent};
use charla_proto::{Envelope, IncomingMessage, Push, SyncBatch};
use charla_store::Database;

use crate::events::{EventBus, Notification};

/// Work forwarded from the classifier to the worker.
enum IngestJob {
    Single(IncomingMessage),
    Sync(SyncBatch),
}

/// Join handles for the two pipeline tasks; they end on their own once the
/// transport delivers its terminal event.
pub struct IngestHandle {
    pub classifier: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

/// Wire the ingestion pipeline onto a connected transport.
///
/// `context` is the live login context; it is read per message so a login
/// completing mid-stream applies to everything merged afterwards.
pub fn spawn(
    transport: &Transport,
    db: Arc<Mutex<Database>>,
    bus: EventBus,
    context: Arc<AtomicI64>,
) -> IngestHandle {
    let (_listener_id, events) = transport.add_listener();
    let (job_tx, job_rx) = mpsc::channel(64);

    let classifier = tokio::spawn(classify_loop(events, job_tx, bus.clone()));
    let worker = tokio::spawn(worker_loop(job_rx, db, bus, context));

    IngestHandle { classifier, worker }
}

async fn classify_loop(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    job_tx: mpsc::Sender<IngestJob>,
    bus: EventBus,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Line(line) => {
                let Ok(envelope) = Envelope::parse(&line) else {
                    debug!(len = line.len(), "ignoring unparseable line");
                    continue;
                };
                match Push::classify(&envelope) {
                    Some(Push::Message(msg)) => {
                        if job_tx.send(IngestJob::Single(msg)).await.is_err() {
                            break;
                        }
                    }
                    Some(Push::Sync(batch)) => {
                        if job_tx.send(IngestJob::Sync(batch)).await.is_err() {
                            break;
                        }
                    }
                    // Terminal notifications bypass the merge queue: they
                    // must reach the presentation layer even with database
                    // work backed up.
                    Some(Push::Kicked { reason }) => {
                        warn!(reason = ?reason, "kicked by server");
                        bus.notify(Notification::Kicked { reason });
                    }
                    Some(Push::ServerShutdown) => {
                        warn!("server announced shutdown");
                        bus.notify(Notification::ServerShutdown);
                    }
                    // Not a push; a correlator waiter may still claim it.
                    None => {}
                }
            }
            TransportEvent::Closed => {
                bus.notify(Notification::ConnectionClosed);
                break;
            }
            TransportEvent::Errored(message) => {
                bus.notify(Notification::ConnectionError { message });
                break;
            }
        }
    }
    debug!("ingest classifier stopped");
}

async fn worker_loop(
    mut jobs: mpsc::Receiver<IngestJob>,
    db: Arc<Mutex<Database>>,
    bus: EventBus,
    context: Arc<AtomicI64>,
) {
    let mut names = NameCache::new(256);

    while let Some(job) = jobs.recv().await {
        let ctx = context.load(Ordering::Acquire);
        match job {
            IngestJob::Single(mut msg) => {
                if msg.sender_name.is_none() {
                    msg.sender_name = names.get(msg.sender_id);
                }

                let db = db.clone();
                let task_msg = msg.clone();
                let merged = tokio::task::spawn_blocking(move || {
                    let db = db.lock().expect("db lock");
                    let mut msg = task_msg;
                    if msg.sender_name.is_none() {
                        // Authoritative fallback behind the cache: the last
                        // name this sender was stored under.
                        msg.sender_name =
                            db.last_known_sender_name(ctx, msg.sender_id).unwrap_or(None);
                    }
                    let outcome = db.merge_incoming(ctx, &msg)?;
                    Ok::<_, charla_store::StoreError>((outcome, msg.sender_name))
                })
                .await;

                match merged {
                    Ok(Ok((outcome, sender_name))) => {
                        if let Some(name) = sender_name {
                            names.insert(msg.sender_id, name);
                        }
                        if outcome.changed_row().is_some() {
                            notify_route(&bus, ctx, &msg);
                        } else {
                            debug!(server_id = ?msg.server_id, "push already applied");
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "dropping one message on persistence failure");
                    }
                    Err(e) => {
                        warn!(error = %e, "ingest merge task failed");
                    }
                }
            }

            IngestJob::Sync(batch) => {
                let db = db.clone();
                let messages = batch.messages.clone();
                let merged =
                    tokio::task::spawn_blocking(move || {
                        db.lock().expect("db lock").merge_batch(ctx, &messages)
                    })
                    .await;

                match merged {
                    Ok(Ok(report)) => {
                        info!(
                            applied = report.applied,
                            unchanged = report.unchanged,
                            failed = report.failed,
                            total = ?batch.total,
                            skipped = batch.skipped,
                            "bulk sync merged"
                        );
                        // One notification per distinct touched id per
                        // pipeline pass, independent of per-row success.
                        for channel_id in &report.touched_channels {
                            bus.notify_channel_updated(*channel_id);
                        }
                        for peer in &report.touched_peers {
                            bus.notify_private_updated(*peer);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "bulk sync merge failed");
                    }
                    Err(e) => {
                        warn!(error = %e, "bulk sync task failed");
                    }
                }
            }
        }
    }
    debug!("ingest worker stopped");
}

fn notify_route(bus: &EventBus, ctx: i64, msg: &IncomingMessage) {
    if let Some(channel_id) = msg.channel_id {
        bus.notify_channel_updated(channel_id);
    } else {
        // Key private conversations by the peer, not by whoever sent it.
        let peer = if msg.sender_id == ctx {
            msg.recipient_id
        } else {
            Some(msg.sender_id)
        };
        if let Some(peer) = peer {
            bus.notify_private_updated(peer);
        }
    }
}

/// Bounded sender-id to display-name cache.
///
/// Eviction is a wholesale reset at capacity; names repopulate from
/// traffic and the store fallback.
struct NameCache {
    map: HashMap<i64, String>,
    cap: usize,
}

impl NameCache {
    fn new(cap: usize) -> Self {
        Self {
            map: HashMap::new(),
            cap,
        }
    }

    fn get(&self, id: i64) -> Option<String> {
        self.map.get(&id).cloned()
    }

    fn insert(&mut self, id: i64, name: String) {
        if !self.map.contains_key(&id) && self.map.len() >= self.cap {
            debug!(cap = self.cap, "name cache reset");
            self.map.clear();
        }
        self.map.insert(id, name);
    }
}
