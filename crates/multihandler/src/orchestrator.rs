//! Orchestrator for wiring together all components.
//!
//! This module provides the `Orchestrator` that owns the session registry,
//! binds the listener, runs the accept loop in the background and hands the
//! operator console its input and output.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::console::Console;
use crate::network::Listener;
use crate::session::SessionRegistry;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Accepting connections.
    Running,
    /// Shutting down.
    ShuttingDown,
}

/// Coordinates the registry, the accept loop and the console.
pub struct Orchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: OrchestratorState,
    /// Registry shared by every component.
    registry: Arc<SessionRegistry>,
    /// Address the listener is bound to, once started.
    local_addr: Option<SocketAddr>,
    /// Accept loop task.
    accept_task: Option<JoinHandle<()>>,
    /// Cancellation token for the accept loop.
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Creates a new orchestrator with an empty registry.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: OrchestratorState::Stopped,
            registry: Arc::new(SessionRegistry::new()),
            local_addr: None,
            accept_task: None,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Returns the shared session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns the bound listener address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds the listener and starts the accept loop.
    ///
    /// A bind failure is returned to the caller and leaves the orchestrator
    /// stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == OrchestratorState::Running {
            debug!("Orchestrator already running");
            return Ok(());
        }

        self.state = OrchestratorState::Starting;

        let addr = self.config.listener.bind_addr();
        let listener = match Listener::bind(&addr, Arc::clone(&self.registry)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state = OrchestratorState::Stopped;
                return Err(e).context("Failed to start listener");
            }
        };
        let local_addr = listener.local_addr()?;

        self.shutdown_token = CancellationToken::new();
        self.accept_task = Some(tokio::spawn(listener.run(self.shutdown_token.clone())));
        self.local_addr = Some(local_addr);
        self.state = OrchestratorState::Running;

        info!(addr = %local_addr, "TCP server listening");
        Ok(())
    }

    /// Runs the operator console until the operator exits.
    pub async fn run_console<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut console = Console::new(
            Arc::clone(&self.registry),
            input,
            output,
            self.config.console.clone(),
        );
        console.run().await.context("Console output failed")
    }

    /// Stops the accept loop and closes every session.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == OrchestratorState::Stopped {
            debug!("Orchestrator already stopped");
            return Ok(());
        }

        self.state = OrchestratorState::ShuttingDown;
        self.shutdown_token.cancel();

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Accept loop task failed");
            }
        }

        let closed = self.registry.close_all().await;
        info!(closed, "Orchestrator stopped");

        self.local_addr = None;
        self.state = OrchestratorState::Stopped;
        Ok(())
    }
}
