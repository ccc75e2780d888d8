//! doc-sync-client: network adapters for doc-sync-core.
//!
//! - `HttpPersistenceClient` talks to the document REST API
//! - `WebSocketChannel` carries realtime document frames
//! - `session` turns line input into controller operations for the CLI

pub mod config;
pub mod http;
pub mod session;
pub mod websocket;

pub use config::{ClientConfig, ConfigError};
pub use http::HttpPersistenceClient;
pub use websocket::WebSocketChannel;
