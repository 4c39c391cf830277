//! Transport collaborator and event-loop subscription handles.

use std::fmt;

use tokio::sync::mpsc;

/// Line-oriented sink for one client connection.
pub trait Transport: Send {
    /// Queue one line. The terminator is added by the transport.
    fn write(&mut self, line: &str);
    fn close(&mut self);
    fn is_closed(&self) -> bool;
    fn peer_hostname(&self) -> String;
    fn local_hostname(&self) -> String;
}

/// A registered callback source (socket reader, liveness timer).
///
/// Released exactly once: explicitly through [`Subscription::release`] or,
/// failing that, when dropped.
pub struct Subscription {
    name: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(name: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::trace!(subscription = self.name, "Releasing subscription");
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Transport writing into the connection's writer task.
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<String>>,
    peer_host: String,
    local_host: String,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<String>, peer_host: String, local_host: String) -> Self {
        Self {
            tx: Some(tx),
            peer_host,
            local_host,
        }
    }
}

impl Transport for ChannelTransport {
    fn write(&mut self, line: &str) {
        let Some(ref tx) = self.tx else {
            return;
        };
        if tx.try_send(format!("{line}\r\n")).is_err() {
            tracing::warn!(peer = %self.peer_host, "Send buffer full or closed");
        }
    }

    fn close(&mut self) {
        // Dropping the sender lets the writer drain and shut the socket.
        self.tx = None;
    }

    fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn peer_hostname(&self) -> String {
        self.peer_host.clone()
    }

    fn local_hostname(&self) -> String {
        self.local_host.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut sub = Subscription::new("read", move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        sub.release();
        sub.release();
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_subscription_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        drop(Subscription::new("timer", move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_transport_terminates_lines_and_closes() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut transport = ChannelTransport::new(tx, "peer".into(), "local".into());
        transport.write("PING :x");
        transport.close();
        transport.write("dropped");
        assert!(transport.is_closed());
        assert_eq!(rx.recv().await.as_deref(), Some("PING :x\r\n"));
        assert_eq!(rx.recv().await, None);
    }
}
