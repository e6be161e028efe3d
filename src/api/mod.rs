//! HTTP API surface for the data source subsystem (spec §6.3).

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::api_routes;
