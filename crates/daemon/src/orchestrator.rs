//! Proxy orchestrator for wiring together all components.
//!
//! This module provides the `ProxyOrchestrator` that owns the session
//! registry, leases the listen port, runs the HTTP server and tears everything
//! down in order on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::network::{PortAllocator, PortSource};
use crate::router::{build_router, AppState};
use crate::session::SessionRegistry;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Leasing the port and binding the listener.
    Starting,
    /// Serving requests.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The HTTP server is accepting connections.
    Listening { addr: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Orchestrator that manages the proxy's subsystems.
pub struct ProxyOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Live sessions.
    registry: Arc<SessionRegistry>,
    /// Where the listen port comes from.
    ports: PortSource,
    /// Port leased at startup, returned at shutdown.
    leased_port: Option<u16>,
    /// Bound address once running.
    local_addr: Option<SocketAddr>,
    /// HTTP server task.
    server: Option<JoinHandle<std::io::Result<()>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ProxyOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new(config.session.registry_settings()));
        let ports = PortSource::from_config(&config).context("Invalid port manager settings")?;
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            registry,
            ports,
            leased_port: None,
            local_addr: None,
            server: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Leases the port, binds the listener and starts serving.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting log listener proxy...");

        if self.shutdown_token.is_cancelled() {
            self.shutdown_token = CancellationToken::new();
        }

        match self.bind_and_serve().await {
            Ok(addr) => {
                self.local_addr = Some(addr);
                *self.state.write().await = OrchestratorState::Running;
                self.emit_event(OrchestratorEvent::Listening { addr });
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));
                info!(%addr, "Log listener proxy listening");
                Ok(())
            }
            Err(e) => {
                error!("Failed to start: {:#}", e);
                self.emit_event(OrchestratorEvent::Error {
                    message: format!("{e:#}"),
                });
                if let Some(port) = self.leased_port.take() {
                    self.ports.release(port).await;
                }
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                Err(e)
            }
        }
    }

    async fn bind_and_serve(&mut self) -> Result<SocketAddr> {
        let port = self
            .ports
            .acquire()
            .await
            .context("Failed to obtain a listen port")?;
        self.leased_port = Some(port);

        let host = self.config.server.host.as_str();
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {host}:{port}"))?;
        let addr = listener
            .local_addr()
            .context("Failed to read bound address")?;

        let app = build_router(AppState::new(Arc::clone(&self.registry)));
        let token = self.shutdown_token.clone();
        self.server = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }));
        debug!("Spawned HTTP server task");

        Ok(addr)
    }

    /// Stops the orchestrator gracefully.
    ///
    /// Sessions are deleted first so every streaming connection receives its
    /// close frame, then the server stops and the port is released.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping log listener proxy...");

        self.registry.shutdown().await;
        self.shutdown_token.cancel();

        if let Some(server) = self.server.take() {
            match server.await {
                Ok(Ok(())) => debug!("HTTP server stopped"),
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        }

        if let Some(port) = self.leased_port.take() {
            self.ports.release(port).await;
        }
        self.local_addr = None;

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Log listener proxy stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.local_addr().is_none());
        assert_eq!(orchestrator.registry().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_port_manager_url_rejected() {
        let mut config = create_test_config();
        config.port_manager.enabled = true;
        config.port_manager.url = "::not a url".to_string();
        assert!(ProxyOrchestrator::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        let addr = orchestrator.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        assert!(matches!(
            events.recv().await.unwrap(),
            OrchestratorEvent::StateChanged(OrchestratorState::Starting)
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            OrchestratorEvent::Listening { addr: a } if a == addr
        ));

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let mut orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        orchestrator.start().await.unwrap();
        assert!(orchestrator.start().await.is_err());
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let mut orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        orchestrator.start().await.unwrap();
        orchestrator.stop().await.unwrap();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(!orchestrator.shutdown_token().is_cancelled());
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_deletes_sessions() {
        let mut orchestrator = ProxyOrchestrator::new(create_test_config()).unwrap();
        orchestrator.start().await.unwrap();
        orchestrator.registry().create("pending").unwrap();

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.registry().count(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_returns_to_stopped() {
        let mut config = create_test_config();
        config.server.host = "256.256.256.256".to_string();
        let mut orchestrator = ProxyOrchestrator::new(config).unwrap();

        assert!(orchestrator.start().await.is_err());
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }
}
