//! CGI/1.1 gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway target request (from http::server)
//!     → env.rs (request metadata → CGI environment)
//!     → process.rs (exec script, own stdin/stdout)
//!     → bridge.rs (body → stdin, stdout → response, concurrently)
//!     → response stream closed, session logged
//!
//! Failure paths:
//!     spawn error        → error.rs → 500 JSON (nothing sent yet)
//!     deadline / hangup  → child killed, response stream aborted
//! ```
//!
//! # Design Decisions
//! - Status 200 is committed as soon as the child is running
//! - One child per request; nothing is shared between exchanges
//! - Every exchange is bounded by a deadline

pub mod bridge;
pub mod env;
pub mod error;
pub mod gateway;
pub mod process;

pub use bridge::{StreamingBridge, StreamingSession};
pub use env::{AmbientEnv, CgiEnvironment, EnvTranslator};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use process::{ProcessHandle, SpawnOptions};
