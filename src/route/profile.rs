use axum::{
	extract::{Path, State},
	response::{IntoResponse, Redirect, Response},
	routing::get,
};

use crate::{
	extract::{Json, Query, Session},
	feed, model, social, AppState, Database, Error,
};

pub fn routes() -> axum::Router<AppState> {
	axum::Router::new()
		.route("/profile/:username/", get(profile))
		.route("/profile/:username/follow/", get(follow))
		.route("/profile/:username/unfollow/", get(unfollow))
		.route("/follow/", get(follow_index))
}

/// Returns an author's profile feed.
async fn profile(
	State(database): State<Database>,
	session: Option<Session>,
	Path(username): Path<String>,
	Query(query): Query<feed::PageQuery>,
) -> Result<Json<feed::ProfileFeed>, Error> {
	let viewer = session.map(|session| session.user.id);

	Ok(Json(
		feed::profile(&database, viewer, &username, query.page).await?,
	))
}

/// Follows an author and returns to their profile.
async fn follow(
	State(database): State<Database>,
	session: Session,
	Path(username): Path<String>,
) -> Result<Response, Error> {
	social::follow(&database, session.user.id, &username).await?;

	Ok(Redirect::to(&format!("/profile/{username}/")).into_response())
}

/// Unfollows an author and returns to their profile.
async fn unfollow(
	State(database): State<Database>,
	session: Session,
	Path(username): Path<String>,
) -> Result<Response, Error> {
	social::unfollow(&database, session.user.id, &username).await?;

	Ok(Redirect::to(&format!("/profile/{username}/")).into_response())
}

/// Returns one page of posts by the authors the session user follows.
async fn follow_index(
	State(database): State<Database>,
	session: Session,
	Query(query): Query<feed::PageQuery>,
) -> Result<Json<feed::Page<model::Post>>, Error> {
	Ok(Json(
		feed::following(&database, session.user.id, query.page).await?,
	))
}
