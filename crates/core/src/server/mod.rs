//! Control server: accept loop and connection threads.
//!
//! The listener accepts control connections and hands each one to its
//! own thread running a [`Connection`](handler::Connection) with a
//! private session state machine and engine pair — a failing
//! connection never affects the others. The accept loop polls a
//! non-blocking listener so [`Server::stop`] can terminate it promptly.

pub(crate) mod handler;

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::media::MediaLibrary;

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control listener address (host:port).
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
        }
    }
}

/// Streaming server over a media library.
pub struct Server {
    library: Arc<dyn MediaLibrary>,
    running: Arc<AtomicBool>,
    config: ServerConfig,
}

impl Server {
    pub fn new(bind_addr: &str, library: Arc<dyn MediaLibrary>) -> Self {
        Self::with_config(
            ServerConfig {
                bind_addr: bind_addr.to_string(),
            },
            library,
        )
    }

    pub fn with_config(config: ServerConfig, library: Arc<dyn MediaLibrary>) -> Self {
        Self {
            library,
            running: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let library = self.library.clone();

        tracing::info!(addr = %self.config.bind_addr, "control server listening");

        thread::spawn(move || {
            accept_loop(listener, library, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Non-blocking accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`Server::stop`] can terminate it promptly.
fn accept_loop(listener: TcpListener, library: Arc<dyn MediaLibrary>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let lib = library.clone();
                let r = running.clone();
                thread::spawn(move || {
                    handler::Connection::handle(stream, lib, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "control accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}
