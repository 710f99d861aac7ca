//! JSON/multipart HTTP API.

mod dto;
mod error;
mod handlers;
mod identity;
mod routes;
mod server;

pub use dto::*;
pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use identity::{ClientHints, CLIENT_ID_HEADER};
pub use routes::router;
pub use server::HttpServer;
