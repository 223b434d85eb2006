use argon2::{
	password_hash::{rand_core::OsRng, SaltString},
	Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
	extract::State,
	http::{header, StatusCode},
	response::{IntoResponse, Redirect, Response},
	routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
	extract::{Json, Query, Session},
	model, session, AppState, Database,
};

pub fn routes() -> axum::Router<AppState> {
	axum::Router::new()
		.route("/signup/", post(signup))
		.route("/login/", get(login_form).post(login))
		.route("/logout/", get(logout))
		.route("/me/", get(me))
}

/// An error that can occur during authentication.
///
/// Note that the messages are presented to the client, so they should not contain
/// sensitive information.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid username or password")]
	InvalidUsernameOrPassword,
	#[error("password hash error")]
	Hash(#[from] argon2::password_hash::Error),
	#[error("username already taken")]
	UsernameTaken,
}

impl Error {
	pub fn status(&self) -> StatusCode {
		match self {
			Self::InvalidUsernameOrPassword => StatusCode::UNAUTHORIZED,
			Self::Hash(..) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::UsernameTaken => StatusCode::CONFLICT,
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		crate::Error::from(self).into_response()
	}
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
	if username.chars().any(|c| !c.is_alphanumeric() && c != '_') {
		return Err(ValidationError::new(
			"username must be letters, digits or underscores",
		));
	}

	Ok(())
}

#[derive(Deserialize, Validate)]
pub struct SignupInput {
	#[validate(length(min = 3, max = 16), custom(function = "validate_username"))]
	pub username: String,
	#[validate(length(min = 8, max = 128))]
	pub password: String,
}

#[derive(Deserialize, Validate)]
pub struct LoginInput {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NextQuery {
	pub next: Option<String>,
}

fn hash_password(hasher: &Argon2, password: &str) -> Result<String, Error> {
	let salt = SaltString::generate(&mut OsRng);

	Ok(hasher.hash_password(password.as_bytes(), &salt)?.to_string())
}

fn verify_password(hasher: &Argon2, hash: &str, password: &str) -> Result<(), Error> {
	let hash = PasswordHash::new(hash).map_err(|_| Error::InvalidUsernameOrPassword)?;

	hasher
		.verify_password(password.as_bytes(), &hash)
		.map_err(|_| Error::InvalidUsernameOrPassword)
}

async fn create_session(database: &Database, user_id: i64) -> Result<Uuid, crate::Error> {
	let session_id = Uuid::new_v4();

	sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES (?, ?, ?)")
		.bind(session_id)
		.bind(user_id)
		.bind(chrono::Utc::now())
		.execute(database)
		.await?;

	Ok(session_id)
}

/// Only same-origin absolute paths are valid return targets.
fn is_safe_target(next: &str) -> bool {
	next.starts_with('/') && !next.starts_with("//")
}

/// The declared login form. Guarded routes redirect here with the original
/// destination in `next`.
async fn login_form(Query(query): Query<NextQuery>) -> Json<serde_json::Value> {
	Json(json!({
		"form": {
			"fields": {
				"username": { "kind": "text", "required": true },
				"password": { "kind": "password", "required": true },
			}
		},
		"next": query.next,
	}))
}

/// Returns the authenticated user.
async fn me(session: Session) -> impl IntoResponse {
	Json(session.user)
}

/// Starts a session, assuming the credentials are valid, and returns to
/// `next` or the global feed.
async fn login(
	State(state): State<AppState>,
	Query(query): Query<NextQuery>,
	Json(auth): Json<LoginInput>,
) -> Result<Response, crate::Error> {
	let user = sqlx::query_as::<_, model::User>("SELECT * FROM users WHERE username = ?")
		.bind(&auth.username)
		.fetch_optional(&state.database)
		.await?;

	let Some(user) = user else {
		return Err(Error::InvalidUsernameOrPassword.into());
	};

	verify_password(&state.hasher, &user.password_hash, &auth.password)?;

	let session_id = create_session(&state.database, user.id).await?;
	let cookie = session::create_cookie(session_id);

	let next = query
		.next
		.as_deref()
		.filter(|next| is_safe_target(next))
		.unwrap_or("/");

	Ok((
		[(header::SET_COOKIE, cookie.to_string())],
		Redirect::to(next),
	)
		.into_response())
}

/// Logs out of the authenticated account.
async fn logout(
	State(database): State<Database>,
	session: Session,
) -> Result<Response, crate::Error> {
	sqlx::query("DELETE FROM sessions WHERE id = ?")
		.bind(session.id)
		.execute(&database)
		.await?;

	// Clear the session cookie
	Ok((
		[(header::SET_COOKIE, session::clear_cookie().to_string())],
		Redirect::to("/"),
	)
		.into_response())
}

/// Registers a new account, returning the user with a session cookie.
async fn signup(
	State(state): State<AppState>,
	Json(auth): Json<SignupInput>,
) -> Result<Response, crate::Error> {
	let password_hash = hash_password(&state.hasher, &auth.password)?;

	let user = sqlx::query_as::<_, model::User>(
		r#"
		INSERT INTO users (username, password_hash, created_at)
		VALUES (?, ?, ?)
		RETURNING *
		"#,
	)
	.bind(&auth.username)
	.bind(&password_hash)
	.bind(chrono::Utc::now())
	.fetch_one(&state.database)
	.await
	.map_err(|e| match e {
		sqlx::Error::Database(ref d) if d.is_unique_violation() => Error::UsernameTaken.into(),
		e => crate::Error::Database(e),
	})?;

	let session_id = create_session(&state.database, user.id).await?;
	let cookie = session::create_cookie(session_id);

	Ok(([(header::SET_COOKIE, cookie.to_string())], Json(user)).into_response())
}
