//! ProxyServer lifecycle and accept loop.
//!
//! A [`ProxyServer`] owns at most one running listener. `start` tears down a
//! previous listener before binding again, and `stop` waits for the accept
//! loop to exit so the port is free once it returns.

use super::forwarding::RequestForwarder;
use super::network::create_listener;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Local reverse proxy in front of the documentation site.
///
/// All methods take `&self`; the server can be shared behind an `Arc` and
/// driven from any task.
#[derive(Default)]
pub struct ProxyServer {
    state: Mutex<ServerState>,
}

#[derive(Default)]
enum ServerState {
    #[default]
    Stopped,
    Running(RunningProxy),
}

struct RunningProxy {
    local_addr: SocketAddr,
    config: ProxyConfig,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl RunningProxy {
    /// Signal the accept loop and every open connection, then wait for the
    /// listener to close.
    async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.accept_task.await {
            error!("Accept loop on {} ended abnormally: {}", self.local_addr, e);
        }
    }
}

impl ProxyServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding `127.0.0.1:<listen_port>` to `target_url`.
    ///
    /// An already running instance is stopped first and a warning is logged.
    /// Returns the bound address, which differs from the requested one only
    /// when port 0 asked for an ephemeral port.
    pub async fn activate(
        &self,
        target_url: &str,
        listen_port: u16,
        mobile_mode: bool,
    ) -> Result<SocketAddr, ProxyError> {
        self.start(ProxyConfig::new(target_url, listen_port, mobile_mode))
            .await
    }

    /// Stop the listener. Does nothing but log a warning when not running.
    pub async fn deactivate(&self) {
        self.stop().await
    }

    /// Start with a full configuration, including pool tuning.
    pub async fn start(&self, config: ProxyConfig) -> Result<SocketAddr, ProxyError> {
        let mut state = self.state.lock().await;

        if let ServerState::Running(running) = std::mem::take(&mut *state) {
            warn!(
                "Double activation of the http proxy, restarting (was on {})",
                running.local_addr
            );
            running.shutdown().await;
        }

        let forwarder = Arc::new(RequestForwarder::from_config(&config)?);

        let bind_error = |source| ProxyError::Bind {
            port: config.listen_port,
            source,
        };
        let listener = create_listener(config.listen_addr()).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!("Listening on http://{}", local_addr);
        info!(
            "Proxying to {} (mobile layout: {})",
            forwarder.target(),
            config.mobile_mode
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, forwarder, shutdown_rx));

        *state = ServerState::Running(RunningProxy {
            local_addr,
            config,
            shutdown_tx,
            accept_task,
        });

        Ok(local_addr)
    }

    /// Stop accepting and close open connections once their in-flight
    /// requests finish.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        match std::mem::take(&mut *state) {
            ServerState::Running(running) => {
                let local_addr = running.local_addr;
                running.shutdown().await;
                info!("Proxy on {} stopped", local_addr);
            }
            ServerState::Stopped => {
                warn!("Double deactivation of the http proxy");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, ServerState::Running(_))
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ServerState::Running(running) => Some(running.local_addr),
            ServerState::Stopped => None,
        }
    }

    /// Configuration of the running instance.
    pub async fn config(&self) -> Option<ProxyConfig> {
        match &*self.state.lock().await {
            ServerState::Running(running) => Some(running.config.clone()),
            ServerState::Stopped => None,
        }
    }
}

/// Resolves once shutdown is requested or the server handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

async fn accept_loop(
    listener: TcpListener,
    forwarder: Arc<RequestForwarder>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut stop_rx = shutdown_rx.clone();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        let forwarder = Arc::clone(&forwarder);
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(serve_connection(stream, remote_addr, forwarder, shutdown_rx));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        // Back off on persistent errors such as fd exhaustion.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
            _ = shutdown_requested(&mut stop_rx) => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    forwarder: Arc<RequestForwarder>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
    }

    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let forwarder = Arc::clone(&forwarder);
        async move { Ok::<_, Infallible>(forwarder.forward(req).await) }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_requested(&mut shutdown_rx) => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    // Client aborts land here; dropping the connection cancels the upstream body.
    if let Err(err) = result {
        debug!("Connection from {} closed: {}", remote_addr, err);
    }
}
