//! # Multihandler
//!
//! A multi-session TCP listener with an interactive operator console.
//!
//! ## Overview
//!
//! The listener accepts raw byte-stream connections and registers each one
//! as a numbered session. From the console the operator can list sessions,
//! attach to one and exchange lines with it, or kill it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Orchestrator                       │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  ┌──────────────┐   ┌───────────────┐   ┌──────────────┐  │
//! │  │ Accept Loop  │──▶│    Session    │◀──│   Operator   │  │
//! │  │  (listener)  │   │   Registry    │   │   Console    │  │
//! │  └──────┬───────┘   └───────▲───────┘   └──────┬───────┘  │
//! │         │ spawns            │ remove           │ use      │
//! │  ┌──────▼──────────────┐    │           ┌──────▼───────┐  │
//! │  │ Disconnect Monitor  │────┘  output   │ Shell Bridge │  │
//! │  │   (one per session) │──────────────▶│              │  │
//! │  └─────────────────────┘                └──────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use multihandler::{Config, Orchestrator};
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = Orchestrator::new(config);
//!     orchestrator.start().await?;
//!
//!     orchestrator
//!         .run_console(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
//!         .await?;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`network`]: Connection trait and the TCP accept loop
//! - [`session`]: Session registry and disconnect monitors
//! - [`console`]: Operator console and shell bridge
//! - [`orchestrator`]: Component wiring and lifecycle

pub mod config;
pub mod console;
pub mod network;
pub mod orchestrator;
pub mod session;

// Re-export config types for convenience
pub use config::Config;

// Re-export network types for convenience
pub use network::{Connection, Listener, ListenerError, MemoryConnection};

// Re-export session types for convenience
pub use session::{SessionError, SessionHandle, SessionId, SessionInfo, SessionRegistry};

// Re-export console types for convenience
pub use console::{Command, CommandError, Console, Detach};

// Re-export orchestrator types for convenience
pub use orchestrator::{Orchestrator, OrchestratorState};
