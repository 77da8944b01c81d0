//! `CivgateServer` builder and server loop.
//!
//! This is the entry point for running a civgate server. It ties the
//! layers together: transport → protocol → session actor.

use std::sync::Arc;
use std::time::Duration;

use civgate_protocol::{Codec, JsonCodec};
use civgate_session::{
    Authenticator, CommandOutcome, Session, SessionConfig, Settings, SnapshotSource,
};
use civgate_transport::{Transport, WebSocketTransport};
use tokio::sync::{mpsc, oneshot};

use crate::actor::{ServerEvent, SessionActor};
use crate::handler::handle_connection;
use crate::rules::{NoRules, RulesEngine};
use crate::{CivgateError, ConfigError, NetworkConfig, ServerConfig};

/// State shared by every connection task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// session itself is not in here: it lives on the actor, reached through
/// `events`.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) events: mpsc::UnboundedSender<ServerEvent>,
    pub(crate) codec: C,
    pub(crate) handshake_timeout: Duration,
    pub(crate) ping_timeout: Duration,
}

/// Builder for configuring and starting a civgate server.
///
/// # Example
///
/// ```rust,no_run
/// use civgate::CivgateServerBuilder;
/// use civgate_session::AllowAll;
///
/// # async fn start() -> Result<(), civgate::CivgateError> {
/// let server = CivgateServerBuilder::new()
///     .bind("0.0.0.0:5556")
///     .build(AllowAll)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct CivgateServerBuilder {
    network: NetworkConfig,
    session_config: SessionConfig,
    settings: Settings,
    snapshots: Option<Box<dyn SnapshotSource>>,
}

impl CivgateServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            network: NetworkConfig::default(),
            session_config: SessionConfig::default(),
            settings: Settings::default(),
            snapshots: None,
        }
    }

    /// Creates a builder from a loaded config file.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            network: config.network.clone(),
            session_config: config.session.clone(),
            settings: config.initial_settings()?,
            snapshots: None,
        })
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.network.bind = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the initial game settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.network.handshake_timeout_secs = timeout.as_secs();
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.network.ping_timeout_secs = timeout.as_secs();
        self
    }

    /// Plugs in the producer of game snapshots.
    pub fn snapshot_source(mut self, source: Box<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(source);
        self
    }

    /// Builds the server with the given authenticator and no rules engine.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<CivgateServer<A, NoRules>, CivgateError> {
        self.build_with_rules(auth, NoRules).await
    }

    /// Builds the server with the given authenticator and rules engine.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build_with_rules<A: Authenticator, R: RulesEngine>(
        self,
        auth: A,
        rules: R,
    ) -> Result<CivgateServer<A, R>, CivgateError> {
        let transport = WebSocketTransport::bind(&self.network.bind).await?;

        let mut session = Session::with_settings(self.session_config, self.settings);
        if let Some(source) = self.snapshots {
            session.set_snapshot_source(source);
        }

        let (events, rx) = mpsc::unbounded_channel();
        let actor = SessionActor::new(session, auth, rules, events.downgrade());
        let state = Arc::new(ServerState {
            events,
            codec: JsonCodec,
            handshake_timeout: self.network.handshake_timeout(),
            ping_timeout: self.network.ping_timeout(),
        });

        Ok(CivgateServer {
            transport,
            state,
            actor,
            rx,
        })
    }
}

impl Default for CivgateServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A civgate server, ready to run.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct CivgateServer<A: Authenticator, R: RulesEngine> {
    transport: WebSocketTransport,
    state: Arc<ServerState<JsonCodec>>,
    actor: SessionActor<A, R>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl<A: Authenticator, R: RulesEngine> CivgateServer<A, R> {
    /// Creates a new builder.
    pub fn builder() -> CivgateServerBuilder {
        CivgateServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns a handle for running commands at the server console.
    pub fn console(&self) -> ConsoleHandle {
        ConsoleHandle {
            events: self.state.events.clone(),
        }
    }

    /// Runs the server.
    ///
    /// Starts the session actor, then accepts connections and spawns a
    /// handler task for each. Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), CivgateError> {
        tracing::info!("civgate server running");
        tokio::spawn(self.actor.run(self.rx));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Runs command lines as the server console, with full access.
#[derive(Debug, Clone)]
pub struct ConsoleHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ConsoleHandle {
    /// Executes one command line (without the leading `/`).
    pub async fn execute(&self, line: &str) -> Result<CommandOutcome, CivgateError> {
        let (reply, answer) = oneshot::channel();
        self.events
            .send(ServerEvent::Console {
                line: line.to_string(),
                reply,
            })
            .map_err(|_| CivgateError::Shutdown)?;
        answer.await.map_err(|_| CivgateError::Shutdown)
    }
}
