//! Gateway server implementation

pub mod auth;
pub mod envelope;
mod router;
mod server;

pub use auth::{ResolvedAuthConfig, auth_middleware};
pub use router::{AppState, create_router};
pub use server::Gateway;
