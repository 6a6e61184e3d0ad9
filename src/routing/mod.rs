//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → resolver.rs (decode, contain within root)
//!     → gateway target?  GET/HEAD/POST → cgi::Gateway
//!     → otherwise        GET/HEAD → static file, POST → 404
//! ```
//!
//! # Design Decisions
//! - Root is resolved at startup, immutable at runtime
//! - Gateway targets are chosen by suffix only
//! - Containment is checked before any file is opened or executed

pub mod resolver;

pub use resolver::{PathResolver, ResolvedPath};
