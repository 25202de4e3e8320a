pub mod api;
pub mod config;
pub mod generator;
pub mod http_server;
pub mod jobs;
pub mod logger;

pub use config::ShovelConfig;
pub use http_server::{build_router, serve, AppState};
pub use jobs::JobRegistry;
pub use logger::{BufferLayer, LogBuffer, LogEntry};
