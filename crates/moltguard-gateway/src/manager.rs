//! Gateway lifecycle management.
//!
//! Supervises the gateway service as a long-running task with an explicit
//! state machine:
//!
//! ```text
//! Stopped → Starting → Running(ready=false) → Running(ready=true)
//!    ▲          │                                     │
//!    │          ▼                                     ▼
//!    └──── Failed                                 Stopping → Stopped
//! ```
//!
//! All transitions happen under one lifecycle lock, so `restart()` never
//! exposes a `Running` state between the stop and the subsequent start.

use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::handler::{router, GatewayState};

/// Interval between readiness probe attempts.
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Maximum number of readiness probe attempts before startup fails.
const PROBE_ATTEMPTS: u32 = 40;

/// Lifecycle state of the gateway service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not running.
    Stopped,
    /// Binding and waiting for readiness.
    Starting,
    /// Serving; `ready` flips once the liveness probe answers.
    Running {
        /// Whether the liveness probe has succeeded.
        ready: bool,
    },
    /// Draining in-flight requests.
    Stopping,
    /// Startup failed (bind error or readiness timeout).
    Failed,
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GatewayStatus {
    /// Whether the service task is running.
    pub running: bool,
    /// Whether the service has answered its liveness probe.
    pub ready: bool,
    /// Configured port.
    pub port: u16,
}

struct RunningServer {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Supervises the gateway proxy's process lifetime.
///
/// The manager exclusively owns the running/ready state; nothing else is
/// permitted to transition it.
pub struct GatewayManager {
    state: GatewayState,
    run_state: Arc<RwLock<RunState>>,
    server: Mutex<Option<RunningServer>>,
    probe: reqwest::Client,
}

impl GatewayManager {
    /// Creates a manager for the given gateway state. The service is not
    /// started until [`GatewayManager::start`] is called.
    pub fn new(state: GatewayState) -> Self {
        Self {
            state,
            run_state: Arc::new(RwLock::new(RunState::Stopped)),
            server: Mutex::new(None),
            probe: reqwest::Client::new(),
        }
    }

    /// The address the gateway binds.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.state.config.port))
    }

    /// Starts the gateway. Idempotent: a second call while running is a
    /// no-op returning the current status.
    pub async fn start(&self) -> Result<GatewayStatus> {
        let mut server = self.server.lock().await;
        self.start_locked(&mut server).await
    }

    /// Stops the gateway, draining in-flight requests for at most the
    /// configured grace period. Idempotent when already stopped.
    pub async fn stop(&self) -> Result<()> {
        let mut server = self.server.lock().await;
        self.stop_locked(&mut server).await
    }

    /// Restarts the gateway. The lifecycle lock is held across both halves,
    /// so no observer sees a `Running` state from before the stop completed.
    pub async fn restart(&self) -> Result<GatewayStatus> {
        let mut server = self.server.lock().await;
        self.stop_locked(&mut server).await?;
        self.start_locked(&mut server).await
    }

    /// Current status. Never blocks on I/O or the lifecycle lock.
    pub fn status(&self) -> GatewayStatus {
        let run_state = *self.run_state.read();
        let (running, ready) = match run_state {
            RunState::Running { ready } => (true, ready),
            RunState::Starting | RunState::Stopping => (true, false),
            RunState::Stopped | RunState::Failed => (false, false),
        };
        GatewayStatus {
            running,
            ready,
            port: self.state.config.port,
        }
    }

    fn set_state(&self, state: RunState) {
        *self.run_state.write() = state;
    }

    async fn start_locked(&self, server: &mut Option<RunningServer>) -> Result<GatewayStatus> {
        if server.is_some() {
            return Ok(self.status());
        }

        let addr = self.addr();
        self.set_state(RunState::Starting);

        let listener = match bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                self.set_state(RunState::Failed);
                return Err(GatewayError::Bind(addr, e));
            }
        };

        let app = router(self.state.clone());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("Gateway server error: {}", e);
            }
        });

        *server = Some(RunningServer {
            shutdown_tx,
            handle,
        });
        self.set_state(RunState::Running { ready: false });
        info!("Gateway listening on {}", addr);

        // Readiness: the socket is bound, but `ready` means the service is
        // answering requests end to end.
        for _ in 0..PROBE_ATTEMPTS {
            if self.probe_healthz().await {
                self.set_state(RunState::Running { ready: true });
                info!("Gateway ready on port {}", addr.port());
                return Ok(self.status());
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }

        warn!("Gateway readiness probe timed out, shutting down");
        self.stop_locked(server).await?;
        self.set_state(RunState::Failed);
        Err(GatewayError::Startup(
            "readiness probe timed out".to_string(),
        ))
    }

    async fn stop_locked(&self, server: &mut Option<RunningServer>) -> Result<()> {
        let Some(running) = server.take() else {
            self.set_state(RunState::Stopped);
            return Ok(());
        };

        self.set_state(RunState::Stopping);
        let _ = running.shutdown_tx.send(true);

        let grace = self.state.config.shutdown_grace();
        let mut handle = running.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => info!("Gateway stopped"),
            Err(_) => {
                warn!("Gateway did not drain within {:?}, aborting", grace);
                handle.abort();
            }
        }

        self.set_state(RunState::Stopped);
        Ok(())
    }

    async fn probe_healthz(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/healthz", self.state.config.port);
        matches!(
            self.probe
                .get(&url)
                .timeout(Duration::from_millis(250))
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }
}

/// Binds the loopback listener with `SO_REUSEADDR` so restarts are not
/// defeated by sockets lingering in TIME_WAIT.
fn bind(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener)
}
