// Relay server: listener, hub and scheduler wiring

use crate::relay::auth::CredentialFile;
use crate::relay::config::ServerConfig;
use crate::relay::connection::{serve_connection, ConnectionContext};
use crate::relay::hub::{Hub, HubCommand, HubHandle};
use crate::relay::scheduler::{DeletionScheduler, SchedulerHandle};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A bound relay server that has not started accepting yet
pub struct RelayServer {
    config: ServerConfig,
    listener: TcpListener,
}

impl RelayServer {
    /// Validate the configuration, prepare storage and bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .with_context(|| format!("Failed to create storage directory {:?}", config.storage_dir))?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

        Ok(Self { config, listener })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Spawn the hub, the scheduler and the accept loop
    pub fn start(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;

        let (hub, hub_handle) = Hub::new(
            self.config.max_sessions,
            CredentialFile::new(&self.config.credentials),
        );
        tokio::spawn(hub.run());

        let scheduler = DeletionScheduler::spawn();

        let ctx = Arc::new(ConnectionContext {
            hub: hub_handle.clone(),
            scheduler: scheduler.clone(),
            storage_dir: self.config.storage_dir.clone(),
            outbound_queue: self.config.outbound_queue,
        });

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(run_listener(self.listener, ctx, shutdown_rx));

        tracing::info!(
            "Relay listening on {} (max {} sessions, storage {:?})",
            addr,
            self.config.max_sessions,
            self.config.storage_dir
        );

        Ok(ServerHandle {
            addr,
            hub: hub_handle,
            scheduler,
            shutdown_tx,
            listener,
        })
    }
}

/// Accept connections until told to stop
async fn run_listener(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tracing::info!("New connection from {}", peer);
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, ctx).await {
                                tracing::error!("Client {} error: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Listener shutting down");
                break;
            }
        }
    }
}

/// Running relay server
pub struct ServerHandle {
    addr: SocketAddr,
    hub: HubHandle,
    scheduler: SchedulerHandle,
    shutdown_tx: mpsc::UnboundedSender<()>,
    listener: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Pending deletions can be inspected or cancelled through this handle
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop accepting, then stop the hub. Open sessions are closed.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.listener
            .await
            .context("Listener task panicked")?;

        self.hub
            .send_command(HubCommand::Shutdown)
            .context("Failed to send shutdown command")?;
        Ok(())
    }
}
