//! service-core: error type, configuration loading and tracing setup shared
//! by the workspace binaries.
pub mod config;
pub mod error;
pub mod observability;

pub use axum;
pub use serde;
pub use serde_json;
pub use tracing;
pub use validator;
