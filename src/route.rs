pub mod auth;
pub mod posts;
pub mod profile;

use crate::Error;

/// Fallback for paths outside the routing table.
pub async fn not_found() -> Error {
	Error::NotFound("page")
}
