//! # civgate
//!
//! Connection and session server for turn-based strategy games.
//!
//! civgate accepts WebSocket clients, runs the join handshake, and keeps
//! track of which connection plays or watches which player, who has
//! handed their player to someone else, and who may run which server
//! command. The game rules themselves plug in through [`RulesEngine`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use civgate::prelude::*;
//!
//! # async fn start() -> Result<(), CivgateError> {
//! let config = ServerConfig::load("civgate.toml")?;
//! let server = CivgateServerBuilder::from_config(&config)?
//!     .build(AllowAll)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod actor;
mod config;
mod error;
mod handler;
mod rules;
mod server;

pub use config::{LoggingConfig, NetworkConfig, ServerConfig};
pub use error::{CivgateError, ConfigError};
pub use rules::{NoRules, Recipient, RulesEngine};
pub use server::{CivgateServer, CivgateServerBuilder, ConsoleHandle};

/// The types most servers and clients need.
pub mod prelude {
    pub use crate::{
        CivgateError, CivgateServer, CivgateServerBuilder, ConsoleHandle, NoRules, Recipient,
        RulesEngine, ServerConfig,
    };
    pub use civgate_protocol::{
        AccessLevel, Codec, ConnectionId, Envelope, EventKind, JsonCodec, Packet, Payload,
        PlayerId, SERVER_CAPABILITY, Version,
    };
    pub use civgate_session::{
        AllowAll, AllowList, Authenticator, CommandOutcome, CommandStatus, SessionConfig,
    };
}
