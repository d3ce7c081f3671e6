//! The listening side of the RPC service.
//!
//! One acceptor loop polls the listening socket with a short timeout so
//! it stays cancellable, and spawns an independent task per accepted
//! connection. Each connection task reads framed requests, dispatches
//! them through the shared service core, and writes framed responses
//! until the peer closes. Stopping sets a shared flag the acceptor
//! checks every poll cycle; in-flight connections drain rather than
//! being aborted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::framing::{read_frame, write_frame, Framing};
use crate::service::{RpcService, ServiceInner};

/// How often the acceptor re-checks the stop flag while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls setup: {0}")]
    Tls(String),
    #[error("already listening")]
    AlreadyListening,
}

/// PEM certificate chain and private key for an encrypted listener.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Where and how to listen.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,
    /// 0 picks an ephemeral port; the bound port is returned.
    pub port: u16,
    pub framing: Framing,
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            framing: Framing::Newline,
            tls: None,
        }
    }
}

pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
    pub(crate) port: u16,
}

impl RpcService {
    /// Bind a listening socket and start accepting connections.
    /// Returns the bound port.
    pub async fn start_listening(&self, config: ListenerConfig) -> Result<u16, ListenerError> {
        // The std mutex guard must not be held across an await point, so
        // the slot is checked up front and claimed again after the bind.
        {
            let slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return Err(ListenerError::AlreadyListening);
            }
        }

        let tls_acceptor = match &config.tls {
            Some(tls) => Some(build_tls_acceptor(tls)?),
            None => None,
        };

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let port = listener.local_addr()?.port();
        let stop = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.inner),
            config.framing,
            tls_acceptor,
            Arc::clone(&stop),
        ));

        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            stop.store(true, Ordering::SeqCst);
            return Err(ListenerError::AlreadyListening);
        }

        tracing::info!(host = %config.host, port, framing = ?config.framing, tls = config.tls.is_some(), "rpc listener started");
        *slot = Some(ListenerHandle { stop, task, port });
        Ok(port)
    }

    /// Signal the acceptor to stop and wait for it to exit. The
    /// listening socket closes with the acceptor; connections already
    /// accepted are left to drain.
    pub async fn stop_listening(&self) {
        let handle = {
            let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::SeqCst);
            let _ = handle.task.await;
            tracing::info!(port = handle.port, "rpc listener stopped");
        }
    }

    /// The port of the running listener, if any.
    pub fn listen_port(&self) -> Option<u16> {
        let slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|h| h.port)
    }
}

async fn accept_loop(
    listener: TcpListener,
    inner: Arc<ServiceInner>,
    framing: Framing,
    tls_acceptor: Option<TlsAcceptor>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        let accepted = match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Err(_) => continue, // poll interval elapsed, re-check the stop flag
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
            Ok(Ok(accepted)) => accepted,
        };

        let (stream, peer) = accepted;
        tracing::debug!(peer = %peer, "connection accepted");

        let inner = Arc::clone(&inner);
        let tls_acceptor = tls_acceptor.clone();
        tokio::spawn(async move {
            let result = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_connection(tls_stream, framing, inner).await,
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "tls handshake failed");
                        return;
                    }
                },
                None => serve_connection(stream, framing, inner).await,
            };
            if let Err(e) = result {
                tracing::warn!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

/// Serve one connection: read a framed request, dispatch, write the
/// framed response, repeat until the peer closes.
async fn serve_connection<S>(
    stream: S,
    framing: Framing,
    inner: Arc<ServiceInner>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    while let Some(request) = read_frame(&mut reader, framing).await? {
        let response = inner.handle_request(&request);
        write_frame(&mut write_half, framing, &response).await?;
    }
    Ok(())
}

fn build_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ListenerError> {
    let cert_file = std::fs::File::open(&config.cert_path)
        .map_err(|e| ListenerError::Tls(format!("open cert {}: {e}", config.cert_path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| ListenerError::Tls(format!("read certs: {e}")))?;
    if certs.is_empty() {
        return Err(ListenerError::Tls(format!(
            "no certificates found in {}",
            config.cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(&config.key_path)
        .map_err(|e| ListenerError::Tls(format!("open key {}: {e}", config.key_path.display())))?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| ListenerError::Tls(format!("read key: {e}")))?
        .ok_or_else(|| {
            ListenerError::Tls(format!(
                "no private key found in {}",
                config.key_path.display()
            ))
        })?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ListenerError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
