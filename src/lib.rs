//! CGI/1.1 gateway library.
//!
//! Serves a document root over HTTP. Paths ending in the configured suffix
//! are executed as CGI scripts with their output streamed back; everything
//! else is served as a static file.

pub mod cgi;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
