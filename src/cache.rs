use std::{
	collections::HashMap,
	sync::Arc,
	time::{Duration, Instant},
};

use axum::{
	body::{Body, Bytes},
	extract::{Request, State},
	http::{header, StatusCode},
	middleware::Next,
	response::{IntoResponse, Response},
};
use tokio::sync::RwLock;

/// How long a rendered global feed page stays valid.
pub const FEED_TTL: Duration = Duration::from_secs(20);

#[derive(Debug)]
struct CacheEntry {
	body: Bytes,
	cached_at: Instant,
}

/// A cache of rendered feed bodies, keyed by request path and query.
///
/// Entries live for a fixed TTL. Writes elsewhere in the application do not
/// invalidate them, so a page may be stale for up to the TTL; `clear`
/// empties the store explicitly.
#[derive(Debug, Clone)]
pub struct FeedCache {
	ttl: Duration,
	store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Default for FeedCache {
	fn default() -> Self {
		Self::new(FEED_TTL)
	}
}

impl FeedCache {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Returns the cached body for `key`, treating expired entries as absent.
	pub async fn get(&self, key: &str) -> Option<Bytes> {
		let store = self.store.read().await;
		let entry = store.get(key)?;

		if entry.cached_at.elapsed() >= self.ttl {
			return None;
		}

		Some(entry.body.clone())
	}

	pub async fn set(&self, key: String, body: Bytes) {
		self.store.write().await.insert(
			key,
			CacheEntry {
				body,
				cached_at: Instant::now(),
			},
		);
	}

	pub async fn clear(&self) {
		self.store.write().await.clear();
	}
}

/// Middleware that serves the route from [`FeedCache`] when it can.
///
/// Only successful responses are stored; errors always pass through.
pub async fn respond_cached(
	State(cache): State<FeedCache>,
	request: Request,
	next: Next,
) -> Response {
	let key = request.uri().path_and_query().map_or_else(
		|| request.uri().path().to_owned(),
		|target| target.as_str().to_owned(),
	);

	if let Some(body) = cache.get(&key).await {
		tracing::debug!(%key, "serving cached feed");

		return ([(header::CONTENT_TYPE, "application/json")], body).into_response();
	}

	let response = next.run(request).await;

	if response.status() != StatusCode::OK {
		return response;
	}

	let (parts, body) = response.into_parts();
	let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await else {
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	};

	cache.set(key, bytes.clone()).await;

	Response::from_parts(parts, Body::from(bytes))
}
