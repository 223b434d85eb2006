#![warn(clippy::pedantic)]

mod cache;
mod error;
mod extract;
mod feed;
mod model;
mod route;
mod session;
mod social;

use argon2::Argon2;
use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use cache::FeedCache;
pub use error::Error;

pub type Database = sqlx::Pool<sqlx::Sqlite>;
pub type AppState = State;

/// The shared application state.
///
/// This holds the dependencies every handler may need: the database
/// connection pool, the password hash configuration and the feed cache.
#[derive(Clone, axum::extract::FromRef)]
pub struct State {
	pub database: Database,
	pub hasher: Argon2<'static>,
	pub feed_cache: FeedCache,
}

/// Builds the application router.
///
/// The global feed sits behind the cache middleware; everything else is
/// served directly.
pub fn router(state: State) -> Router {
	let index = Router::new()
		.route("/", get(route::posts::index))
		.route_layer(middleware::from_fn_with_state(
			state.clone(),
			cache::respond_cached,
		));

	Router::new()
		.merge(index)
		.merge(route::posts::routes())
		.merge(route::profile::routes())
		.nest("/auth", route::auth::routes())
		.fallback(route::not_found)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt::init();
	dotenvy::dotenv().ok();

	let database = Database::connect(
		&std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
	)
	.await
	.expect("failed to connect to database");

	sqlx::migrate!()
		.run(&database)
		.await
		.expect("failed to run migrations");

	let state = State {
		database,
		hasher: Argon2::default(),
		feed_cache: FeedCache::default(),
	};

	let app = router(state);

	let port = std::env::var("PORT").map_or_else(
		|_| 3000,
		|port| port.parse().expect("PORT must be a number"),
	);

	let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
		.await
		.expect("failed to bind to port");

	tracing::info!("listening on port {}", port);

	axum::serve(listener, app).await.unwrap();
}
