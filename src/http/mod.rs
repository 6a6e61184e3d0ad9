//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (request ID, request view for the translator)
//!     → routing::resolver (contain path within the document root)
//!     → cgi::Gateway      (gateway targets)
//!     → response.rs       (static files, plain 404)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{HttpRequestView, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
