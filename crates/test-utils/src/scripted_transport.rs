use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use dagcron::errors::ConnectionError;
use dagcron::exec::{ChannelEvent, Connection, OutputStream, RemoteProcess, Transport};

/// A transport whose channels are driven by the test.
///
/// Every opened channel is queued; the test picks it up with
/// [`ScriptedTransport::next_channel`] and feeds it output, an exit status
/// or a lost-connection event.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    channels: Mutex<VecDeque<ScriptedChannel>>,
    notify: Notify,
}

/// Test side of one channel.
#[derive(Debug)]
pub struct ScriptedChannel {
    pub hostname: String,
    pub command: String,
    events: mpsc::Sender<ChannelEvent>,
    kill: oneshot::Receiver<()>,
}

impl ScriptedChannel {
    pub async fn stdout(&self, data: &str) {
        self.send(ChannelEvent::Output {
            stream: OutputStream::Stdout,
            data: data.as_bytes().to_vec(),
        })
        .await;
    }

    pub async fn stderr(&self, data: &str) {
        self.send(ChannelEvent::Output {
            stream: OutputStream::Stderr,
            data: data.as_bytes().to_vec(),
        })
        .await;
    }

    pub async fn exit(self, status: i32) {
        self.send(ChannelEvent::Exit(status)).await;
    }

    pub async fn lose(self, reason: &str) {
        self.send(ChannelEvent::Lost(reason.to_string())).await;
    }

    /// Wait until the node signals the process.
    pub async fn killed(&mut self) -> bool {
        (&mut self.kill).await.is_ok()
    }

    async fn send(&self, event: ChannelEvent) {
        let _ = self.events.send(event).await;
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open_connection` fail.
    pub fn fail_connections(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Successful `open_connection` calls so far.
    pub fn connections(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Wait for the next channel any node opens.
    pub async fn next_channel(&self) -> ScriptedChannel {
        loop {
            if let Some(channel) = self.inner.channels.lock().unwrap().pop_front() {
                return channel;
            }
            self.inner.notify.notified().await;
        }
    }
}

#[derive(Debug)]
struct ScriptedConnection {
    hostname: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_connection(&self, hostname: &str) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError {
                node: hostname.to_string(),
                reason: "scripted connect failure".to_string(),
            });
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            hostname: hostname.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn open_channel(&self, command: &str) -> Result<RemoteProcess, ConnectionError> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.inner.channels.lock().unwrap().push_back(ScriptedChannel {
            hostname: self.hostname.clone(),
            command: command.to_string(),
            events: events_tx,
            kill: kill_rx,
        });
        self.inner.notify.notify_one();
        Ok(RemoteProcess {
            events: events_rx,
            kill: kill_tx,
        })
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}
