use axum::{
	body::Body,
	extract::{FromRef, FromRequest, FromRequestParts, OriginalUri, Request},
	http::{header, request, Response},
	response::IntoResponse,
};
use serde::de;
use uuid::Uuid;

use crate::{error::Error, model, session::COOKIE_NAME, Database};

/// Extractor that deserializes a JSON body and validates it.
pub struct Json<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for Json<T>
where
	T: de::DeserializeOwned + validator::Validate,
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
		let result = axum::extract::Json::<T>::from_request(req, state).await?.0;

		result.validate().map_err(Error::Validation)?;
		Ok(Self(result))
	}
}

impl<T> IntoResponse for Json<T>
where
	T: serde::Serialize,
{
	fn into_response(self) -> Response<Body> {
		axum::extract::Json(self.0).into_response()
	}
}

/// Extractor that deserializes a query string and validates it.
pub struct Query<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for Query<T>
where
	T: de::DeserializeOwned + validator::Validate,
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(
		parts: &mut request::Parts,
		state: &S,
	) -> Result<Self, Self::Rejection> {
		let result = axum::extract::Query::<T>::from_request_parts(parts, state)
			.await?
			.0;

		result.validate().map_err(Error::Validation)?;
		Ok(Self(result))
	}
}

/// Extracts the session and related user from the request.
///
/// Guarded handlers take this as an explicit parameter. When the cookie is
/// missing, malformed or does not match a live session, the rejection is a
/// redirect to the login form carrying the original destination in `next`,
/// never an error status.
#[derive(Debug)]
pub struct Session {
	pub id: Uuid,
	pub user: model::User,
}

fn login_redirect(parts: &request::Parts) -> Error {
	// Inside nested routers `parts.uri` is stripped, so prefer the
	// original uri recorded by the router.
	let uri = parts
		.extensions
		.get::<OriginalUri>()
		.map_or(&parts.uri, |original| &original.0);

	let next = uri.path_and_query().map_or_else(
		|| uri.path().to_owned(),
		|target| target.as_str().to_owned(),
	);

	Error::LoginRequired { next }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
	Database: FromRef<S>,
	S: Sync + Send,
{
	type Rejection = Error;

	async fn from_request_parts(
		parts: &mut request::Parts,
		state: &S,
	) -> Result<Self, Self::Rejection> {
		let cookie = parts
			.headers
			.get(header::COOKIE)
			.and_then(|value| value.to_str().ok())
			.unwrap_or("");

		let Some(session_cookie) = cookie::Cookie::split_parse(cookie)
			.filter_map(|cookie| cookie.ok())
			.find(|cookie| cookie.name() == COOKIE_NAME)
		else {
			return Err(login_redirect(parts));
		};

		let Ok(session_id) = Uuid::parse_str(session_cookie.value()) else {
			return Err(login_redirect(parts));
		};

		let database = Database::from_ref(state);
		let user = sqlx::query_as::<_, model::User>(
			r#"
			SELECT users.* FROM users
			JOIN sessions ON sessions.user_id = users.id
			WHERE sessions.id = ?
			"#,
		)
		.bind(session_id)
		.fetch_optional(&database)
		.await?;

		let Some(user) = user else {
			return Err(login_redirect(parts));
		};

		Ok(Self {
			id: session_id,
			user,
		})
	}
}
