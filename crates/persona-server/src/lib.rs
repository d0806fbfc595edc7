pub mod api;
pub mod auth;
pub mod config;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use relay::{Relay, SessionRegistry};
pub use server::{build_router, start, AppState, ServerHandle, Services};
pub use shutdown::ShutdownCoordinator;
