//! TCP listener and per-connection tasks.
//!
//! Each accepted connection gets its own [`Session`] driven by a single
//! task. Socket reads, liveness ticks, backend results and requests from
//! other sessions all reach that task as messages, so the session itself
//! never needs locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::backend::memory::MemoryBackend;
use crate::config::{ServerConfig, SessionConfig};
use crate::listener::{Forward, Listener};
use crate::session::Session;
use crate::transport::{ChannelTransport, Subscription};

/// Input for a session task.
#[derive(Debug)]
pub enum SessionEvent {
    Data(Vec<u8>),
    Tick,
    /// The socket went away.
    Closed(String),
    Wallops { from: String, text: String },
    Reconfigure(Arc<SessionConfig>),
    Shutdown,
}

/// Registry of live sessions. Acts as the [`Listener`] of every session.
pub struct Manager {
    config: ServerConfig,
    session_config: RwLock<Arc<SessionConfig>>,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<SessionEvent>>>,
    shutdown: Notify,
}

impl Manager {
    pub fn new(config: ServerConfig, session_config: SessionConfig) -> Self {
        Self {
            config,
            session_config: RwLock::new(Arc::new(session_config)),
            sessions: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
        }
    }

    pub fn session_config(&self) -> Arc<SessionConfig> {
        self.session_config.read().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn register(&self, session_id: &str, tx: mpsc::UnboundedSender<SessionEvent>) {
        self.sessions.lock().insert(session_id.to_string(), tx);
    }

    /// Resolves once shutdown was requested.
    pub async fn stopped(&self) {
        self.shutdown.notified().await;
    }
}

impl Listener for Manager {
    fn rehash(&self) {
        let current = self.session_config();
        match current.reloaded(&self.config) {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                *self.session_config.write() = fresh.clone();
                for tx in self.sessions.lock().values() {
                    let _ = tx.send(SessionEvent::Reconfigure(fresh.clone()));
                }
                tracing::info!("Configuration reloaded");
            }
            Err(e) => tracing::warn!("Configuration reload failed: {e}"),
        }
    }

    fn forward(&self, session_id: &str, request: Forward) -> bool {
        match request {
            Forward::Wallops { sender, text } => {
                let mut delivered = false;
                for (id, tx) in self.sessions.lock().iter() {
                    if id == session_id {
                        continue;
                    }
                    let event = SessionEvent::Wallops {
                        from: sender.clone(),
                        text: text.clone(),
                    };
                    delivered |= tx.send(event).is_ok();
                }
                delivered
            }
            Forward::Die { sender } => {
                tracing::warn!(%session_id, %sender, "Server shutdown requested");
                self.shutdown();
                true
            }
        }
    }

    fn shutdown(&self) {
        for tx in self.sessions.lock().values() {
            let _ = tx.send(SessionEvent::Shutdown);
        }
        self.shutdown.notify_one();
    }

    fn dispose(&self, session_id: &str) {
        if self.sessions.lock().remove(session_id).is_some() {
            tracing::debug!(%session_id, "Session disposed");
        }
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    fn build_manager(&self) -> Result<Arc<Manager>> {
        let session_config =
            SessionConfig::load(&self.config).context("loading session configuration")?;
        Ok(Arc::new(Manager::new(self.config.clone(), session_config)))
    }

    /// Accept connections until a DIE request stops the server.
    pub async fn run(self) -> Result<()> {
        let manager = self.build_manager()?;
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.listen_addr))?;
        tracing::info!("Listening on {}", self.config.listen_addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let manager = Arc::clone(&manager);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, manager).await {
                                tracing::error!("Connection error: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {e}"),
                },
                _ = manager.stopped() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Start the server and return the bound address, the session registry
    /// and the accept task (for testing).
    pub async fn start(self) -> Result<(SocketAddr, Arc<Manager>, JoinHandle<Result<()>>)> {
        let manager = self.build_manager()?;
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let accept_manager = Arc::clone(&manager);
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _addr) = listener.accept().await?;
                let manager = Arc::clone(&accept_manager);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, manager).await {
                        tracing::error!("Connection error: {e}");
                    }
                });
            }
        });

        Ok((addr, manager, handle))
    }
}

/// Backend for one connection: credentials under the data directory and
/// the configured accounts.
fn build_backend(config: &ServerConfig) -> Result<MemoryBackend> {
    let backend = match config.data_dir {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
            MemoryBackend::with_store(&dir.join("credentials.json"))?
        }
        None => MemoryBackend::new(),
    };
    for account in &config.accounts {
        backend.add_account(&account.id, &account.protocol, &account.username);
    }
    Ok(backend)
}

/// Drive one client connection until its session closes.
pub async fn handle_connection(stream: TcpStream, manager: Arc<Manager>) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let session_id = format!("conn-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
    let peer_host = stream
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let local_host = stream
        .local_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    tracing::info!(%session_id, peer = %peer_host, "New connection");

    let (mut reader, writer) = stream.into_split();

    // Channel for sending lines TO this client
    let (out_tx, out_rx) = mpsc::channel::<String>(4096);
    let write_handle = tokio::spawn(write_loop(writer, out_rx, session_id.clone()));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (backend_tx, mut backend_rx) = mpsc::unbounded_channel();
    manager.register(&session_id, events_tx.clone());

    let config = manager.session_config();
    let backend = match build_backend(&manager.config) {
        Ok(backend) => backend,
        Err(e) => {
            manager.dispose(&session_id);
            return Err(e);
        }
    };
    backend.attach_events(backend_tx);
    let transport = ChannelTransport::new(out_tx, peer_host, local_host);
    let listener: Arc<dyn Listener> = manager.clone();
    let mut session = match Session::new(
        session_id.clone(),
        config.clone(),
        Box::new(transport),
        Box::new(backend),
        Some(listener),
    ) {
        Ok(session) => session,
        Err(e) => {
            manager.dispose(&session_id);
            return Err(e.into());
        }
    };

    let reader_tx = events_tx.clone();
    let reader_handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = reader_tx.send(SessionEvent::Closed("Connection reset by peer".into()));
                    break;
                }
                Ok(n) => {
                    if reader_tx.send(SessionEvent::Data(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = reader_tx.send(SessionEvent::Closed(format!("Read error: {e}")));
                    break;
                }
            }
        }
    });
    session.add_subscription(Subscription::new("reader", move || reader_handle.abort()));

    let tick_tx = events_tx;
    let period = config.ping_interval;
    let ticker_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            if tick_tx.send(SessionEvent::Tick).is_err() {
                break;
            }
        }
    });
    session.add_subscription(Subscription::new("liveness", move || ticker_handle.abort()));

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(SessionEvent::Data(bytes)) => session.feed(&bytes),
                Some(SessionEvent::Tick) => session.check_liveness(std::time::Instant::now()),
                Some(SessionEvent::Closed(reason)) => session.quit(&reason),
                Some(SessionEvent::Wallops { from, text }) => session.wallops(&from, &text),
                Some(SessionEvent::Reconfigure(config)) => session.reconfigure(config),
                Some(SessionEvent::Shutdown) => session.quit("Server shutting down"),
                None => break,
            },
            Some(event) = backend_rx.recv() => session.handle_event(event),
        }
        if session.is_closed() {
            break;
        }
    }

    manager.dispose(&session_id);
    // Dropping the session drops the transport sender, which ends the writer.
    drop(session);
    let _ = write_handle.await;
    tracing::info!(%session_id, "Connection closed");
    Ok(())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<String>, session_id: String) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(%session_id, "Write error: {e}");
            return;
        }
        // Drain any queued lines and batch-write them
        let mut batch_count = 0;
        while let Ok(queued) = rx.try_recv() {
            if let Err(e) = writer.write_all(queued.as_bytes()).await {
                tracing::warn!(%session_id, "Write error: {e}");
                return;
            }
            batch_count += 1;
            if batch_count >= 64 {
                break;
            }
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(%session_id, "Flush error: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
