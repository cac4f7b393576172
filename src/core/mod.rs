pub mod error;
pub mod types;

pub use error::{GatewayError, Result};
pub use types::{ActionResult, EntityId, Row};
