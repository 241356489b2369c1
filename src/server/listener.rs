//! Connection listener for Unix domain sockets and TCP
//!
//! Every accepted connection gets its own task and its own `Session`. Events
//! are read one at a time and handed to the session; replies are written back
//! in order. The task ends when the session finishes its exchange, the client
//! disconnects, or the server shuts down.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::model::InferenceGate;
use crate::protocol::{read_event, write_event, Event};
use crate::session::Session;

use super::endpoint::Endpoint;

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// Server accepting protocol clients
pub struct Server {
    endpoint: Endpoint,
    listener: Listener,
    gate: InferenceGate,
    info: Arc<Event>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the endpoint. Sessions share `gate` and answer `describe` with `info`.
    pub async fn bind(endpoint: &Endpoint, gate: InferenceGate, info: Arc<Event>) -> Result<Self> {
        let listener = match endpoint {
            Endpoint::Unix(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .context("failed to create socket directory")?;
                }

                // Remove stale socket if it exists
                if path.exists() {
                    std::fs::remove_file(path).context("failed to remove stale socket")?;
                }

                Listener::Unix(UnixListener::bind(path).context("failed to bind Unix socket")?)
            }
            Endpoint::Tcp(addr) => Listener::Tcp(
                TcpListener::bind(addr.as_str())
                    .await
                    .with_context(|| format!("failed to bind TCP address {addr}"))?,
            ),
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(%endpoint, "server listening");

        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            gate,
            info,
            shutdown_tx,
        })
    }

    /// Local TCP address, when bound to TCP
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(_) => None,
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            let accepted = match &self.listener {
                Listener::Unix(listener) => listener
                    .accept()
                    .await
                    .map(|(stream, _addr)| self.spawn_client(stream, "unix".to_string())),
                Listener::Tcp(listener) => listener
                    .accept()
                    .await
                    .map(|(stream, addr)| self.spawn_client(stream, addr.to_string())),
            };

            if let Err(e) = accepted {
                error!(?e, "accept error");
            }
        }
    }

    fn spawn_client<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        debug!(%peer, "client connected");
        let session = Session::new(self.gate.clone(), Arc::clone(&self.info));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                result = handle_client(stream, session) => {
                    if let Err(e) = result {
                        warn!(%peer, error = ?e, "client handler error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!(%peer, "client handler shutting down");
                }
            }
        });
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if let Endpoint::Unix(path) = &self.endpoint {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(?e, "failed to remove socket file");
                }
            }
        }

        info!("server shutdown complete");
    }
}

/// Drive one connection until its session finishes or the client leaves
pub(crate) async fn handle_client<S>(stream: S, mut session: Session) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let Some(event) = read_event(&mut reader)
            .await
            .context("failed to read event")?
        else {
            debug!(
                mid_utterance = session.is_receiving_audio(),
                discarded_bytes = session.buffered_len(),
                "client disconnected"
            );
            return Ok(());
        };

        debug!(
            event_type = event.event_type(),
            data = ?event.data(),
            payload_bytes = event.payload().map_or(0, <[u8]>::len),
            "received event"
        );

        let handled = session.handle(event).await.context("session failed")?;

        if let Some(reply) = &handled.reply {
            write_event(&mut writer, reply)
                .await
                .context("failed to write event")?;
        }

        if !handled.continue_session {
            debug!("exchange complete, closing connection");
            return Ok(());
        }
    }
}
