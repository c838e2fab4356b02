//! Send-and-await-response correlation.
//!
//! A [`ResponseWaiter`] is a temporary transport listener that resolves on
//! the first line whose command equals the expected name or the reserved
//! `ERROR` command. Each concurrent waiter filters independently, so one
//! inbound line can satisfy several waiters for the same command at once;
//! responses are idempotent to re-observe, which is the accepted trade-off
//! for not having to track request identity on the wire.
//!
//! Deregistration is tied to the waiter's `Drop`, so cancelling on timeout
//! and removing the listener is a single step -- a late line cannot race a
//! timed-out waiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use charla_proto::{commands, Envelope};

use crate::transport::{ListenerId, Transport, TransportEvent};

/// Correlates responses on top of a [`Transport`]'s listener mechanism.
#[derive(Clone)]
pub struct Correlator {
    transport: Arc<Transport>,
}

impl Correlator {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Register a waiter *before* the request is sent, so a fast response
    /// cannot slip past between send and await.
    pub fn watch(&self, expected: impl Into<String>) -> ResponseWaiter {
        let expected = expected.into();
        let (id, rx) = self.transport.add_listener();
        ResponseWaiter {
            expected,
            rx,
            _guard: ListenerGuard {
                transport: self.transport.clone(),
                id,
            },
        }
    }

    /// Await the first line matching `expected` (or `ERROR`) within the
    /// timeout. `None` means no response: timeout or transport closure.
    pub async fn await_response(&self, expected: &str, timeout: Duration) -> Option<String> {
        self.watch(expected).wait(timeout).await
    }
}

/// A registered, single-use response listener.
pub struct ResponseWaiter {
    expected: String,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    _guard: ListenerGuard,
}

impl ResponseWaiter {
    /// Block (asynchronously) until a qualifying line arrives, the timeout
    /// elapses, or the transport closes. Consumes the waiter; the listener
    /// is deregistered on return.
    pub async fn wait(mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .ok()??;
            match event {
                TransportEvent::Line(line) => {
                    if self.matches(&line) {
                        return Some(line);
                    }
                }
                TransportEvent::Closed | TransportEvent::Errored(_) => {
                    debug!(expected = %self.expected, "Transport ended while awaiting response");
                    return None;
                }
            }
        }
    }

    fn matches(&self, line: &str) -> bool {
        match Envelope::peek_command(line) {
            Some(cmd) => cmd == self.expected || cmd == commands::ERROR,
            None => false,
        }
    }
}

struct ListenerGuard {
    transport: Arc<Transport>,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.transport.remove_listener(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use crate::config::NetConfig;

    async fn connected_pair() -> (tokio::net::TcpStream, Arc<Transport>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetConfig {
            port: listener.local_addr().unwrap().port(),
            ..NetConfig::default()
        };
        let transport = Arc::new(Transport::connect(&config).await.unwrap());
        let (server, _) = listener.accept().await.unwrap();
        (server, transport)
    }

    #[tokio::test]
    async fn test_first_matching_line_wins() {
        let (mut server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport);

        let waiter = correlator.watch("LOGIN");
        server
            .write_all(
                b"{\"command\":\"EVENT\",\"payload\":{\"tipo\":\"NEW_MESSAGE\"}}\n\
                  {\"command\":\"LOGIN\",\"payload\":{\"success\":true}}\n",
            )
            .await
            .unwrap();

        let line = waiter.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(Envelope::peek_command(&line).as_deref(), Some("LOGIN"));
    }

    #[tokio::test]
    async fn test_error_satisfies_any_waiter() {
        let (mut server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport);

        let waiter = correlator.watch("LIST_USERS");
        server
            .write_all(b"{\"command\":\"ERROR\",\"payload\":{\"message\":\"nope\"}}\n")
            .await
            .unwrap();

        let line = waiter.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(Envelope::peek_command(&line).as_deref(), Some("ERROR"));
    }

    #[tokio::test]
    async fn test_timeout_returns_absent_within_bound() {
        let (_server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport.clone());

        let started = Instant::now();
        let got = correlator
            .await_response("PING", Duration::from_millis(100))
            .await;
        assert!(got.is_none());
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_one_line_satisfies_all_waiters() {
        let (mut server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport);

        let w1 = correlator.watch("PING");
        let w2 = correlator.watch("PING");
        let w3 = correlator.watch("PING");

        server
            .write_all(b"{\"command\":\"PING\",\"payload\":null}\n")
            .await
            .unwrap();

        let t = Duration::from_secs(2);
        let (a, b, c) = tokio::join!(w1.wait(t), w2.wait(t), w3.wait(t));
        assert!(a.is_some() && b.is_some() && c.is_some());
    }

    #[tokio::test]
    async fn test_close_resolves_all_waiters_without_leaks() {
        let (_server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport.clone());

        let w1 = correlator.watch("LOGIN");
        let w2 = correlator.watch("LIST_USERS");
        let w3 = correlator.watch("PING");

        let closer = {
            let transport = transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                transport.close().await;
            })
        };

        let t = Duration::from_secs(5);
        let started = Instant::now();
        let (a, b, c) = tokio::join!(w1.wait(t), w2.wait(t), w3.wait(t));
        closer.await.unwrap();

        assert!(a.is_none() && b.is_none() && c.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(transport.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_deregisters() {
        let (_server, transport) = connected_pair().await;
        let correlator = Correlator::new(transport.clone());

        let waiter = correlator.watch("LOGIN");
        assert_eq!(transport.listener_count(), 1);
        drop(waiter);
        assert_eq!(transport.listener_count(), 0);
    }
}
