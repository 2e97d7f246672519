pub mod config;
pub mod handlers;
pub mod http_resolver;
pub mod observability;
pub mod server;

pub use http_resolver::HttpClinicianResolver;
pub use server::{AppState, DecisionServer, ServerBuilder, StartupError, build_app};
