//! HTTP and WebSocket entry point

pub mod routes;
pub mod server;

pub use routes::AppState;
pub use server::{router, ApiServer, ApiServerConfig};
