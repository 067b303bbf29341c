//! Server assembly: bind, recover, spawn, and tear down.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Sender, tick, unbounded};
use serde::{Deserialize, Serialize};
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;

use crate::config::Config;
use crate::core::LamportClock;
use crate::paths;

use super::executor::{EngineMessage, run_state_loop};
use super::expiry::ExpiryRegistry;
use super::now_ms;
use super::session::{SessionRegistry, run_acceptor};
use super::store::{StationStore, StoreError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr} after {attempts} attempts: {source}")]
    Bind {
        addr: String,
        attempts: u32,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write daemon metadata: {0}")]
    Meta(#[source] std::io::Error),
}

/// Written next to the data dir so operators and tools can find a running
/// daemon.
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonMeta {
    pub version: String,
    pub pid: u32,
    pub addr: String,
}

/// A running daemon. Dropping it does not stop the threads; call
/// [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_flag: Arc<AtomicBool>,
    req_tx: Sender<EngineMessage>,
    sessions: SessionRegistry,
    acceptor: JoinHandle<()>,
    executor: JoinHandle<()>,
    meta_path: std::path::PathBuf,
}

impl ServerHandle {
    /// Actual bound address. With a `:0` listen config this carries the
    /// kernel-assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag observed by the accept loop; signal handlers set it directly.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Orderly teardown: stop accepting, drain the executor, force-close
    /// live sessions, and drop the metadata file.
    pub fn shutdown(self) {
        self.shutdown_flag.store(true, Ordering::Release);
        let _ = self.req_tx.send(EngineMessage::Shutdown);
        if self.acceptor.join().is_err() {
            tracing::warn!("acceptor thread panicked");
        }
        if self.executor.join().is_err() {
            tracing::warn!("executor thread panicked");
        }
        self.sessions.close_all();
        if let Err(err) = std::fs::remove_file(&self.meta_path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("failed to remove daemon metadata: {err}");
        }
        tracing::info!("daemon stopped");
    }
}

fn bind_with_retry(addr: &str, retries: u32, backoff: Duration) -> Result<TcpListener, ServerError> {
    let attempts = retries.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                tracing::warn!(addr, attempt, "bind failed: {err}");
                last_err = Some(err);
                if attempt < attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(ServerError::Bind {
        addr: addr.to_string(),
        attempts,
        source: last_err.expect("at least one bind attempt"),
    })
}

/// Start the daemon: recover durable state, bind the listener, and spawn
/// the executor and acceptor threads.
pub fn run_server(config: &Config) -> Result<ServerHandle, ServerError> {
    let data_dir = config.resolve_data_dir();
    let mut store = StationStore::open(paths::stations_dir(&data_dir))?;

    // Crash recovery: surviving units come back with a fresh TTL lease.
    let now = now_ms();
    let recovered = store.recover(now)?;
    let mut registry = ExpiryRegistry::new();
    for station in &recovered {
        registry.touch(station, now);
    }
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "recovered stations from disk");
    }

    let listener = bind_with_retry(
        &config.listen_addr,
        config.bind_retries,
        Duration::from_millis(config.bind_backoff_ms),
    )?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let clock = Arc::new(LamportClock::new());
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let sessions = SessionRegistry::new();
    let (req_tx, req_rx) = unbounded();
    let sweep_rx = tick(Duration::from_millis(config.sweep_interval_ms.max(1)));

    let ttl_ms = config.ttl_ms;
    let executor = {
        let clock = Arc::clone(&clock);
        thread::Builder::new()
            .name("stationd-executor".to_string())
            .spawn(move || run_state_loop(req_rx, sweep_rx, store, registry, clock, ttl_ms))
            .map_err(ServerError::Io)?
    };

    let acceptor = {
        let shutdown_flag = Arc::clone(&shutdown_flag);
        let req_tx = req_tx.clone();
        let sessions = sessions.clone();
        let clock = Arc::clone(&clock);
        thread::Builder::new()
            .name("stationd-acceptor".to_string())
            .spawn(move || run_acceptor(listener, shutdown_flag, req_tx, sessions, clock))
            .map_err(ServerError::Io)?
    };

    let meta_path = paths::meta_path(&data_dir);
    write_meta(&meta_path, local_addr)?;

    tracing::info!(%local_addr, "daemon listening");
    Ok(ServerHandle {
        local_addr,
        shutdown_flag,
        req_tx,
        sessions,
        acceptor,
        executor,
        meta_path,
    })
}

fn write_meta(path: &std::path::Path, addr: SocketAddr) -> Result<(), ServerError> {
    let meta = DaemonMeta {
        version: env!("CARGO_PKG_VERSION").to_string(),
        pid: std::process::id(),
        addr: addr.to_string(),
    };
    let json = serde_json::to_string_pretty(&meta).expect("meta is serializable");
    std::fs::write(path, json).map_err(ServerError::Meta)
}

/// Run the daemon in the foreground until SIGINT or SIGTERM.
pub fn serve(config: &Config) -> Result<(), ServerError> {
    let handle = run_server(config)?;
    let flag = handle.shutdown_flag();
    signal_hook::flag::register(SIGTERM, Arc::clone(&flag))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))?;

    while !flag.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(100));
    }
    tracing::info!("shutdown signal received");
    handle.shutdown();
    Ok(())
}
