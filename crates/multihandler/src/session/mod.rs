//! Session management module.
//!
//! This module provides the session registry and the per-session
//! disconnect monitor that reclaims a session when its connection ends.

pub mod monitor;
pub mod registry;

pub use monitor::MonitorExit;
pub use registry::{
    Attachment, SessionError, SessionHandle, SessionId, SessionInfo, SessionReader,
    SessionRegistry, FIRST_SESSION_ID,
};
