use std::collections::BTreeMap;

use axum::{
	extract::{Path, State},
	response::{IntoResponse, Redirect, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::{
	extract::{Json, Query, Session},
	feed, model, AppState, Database, Error,
};

pub fn routes() -> axum::Router<AppState> {
	axum::Router::new()
		.route("/group/:slug/", get(group_feed))
		.route("/posts/:id/", get(post_detail))
		.route("/create/", get(create_form).post(create_post))
		.route("/posts/:id/edit/", get(edit_form).post(edit_post))
		.route("/posts/:id/delete/", post(delete_post))
		.route("/posts/:id/comment/", post(add_comment))
}

/// The post form input. There is no author field: authorship always comes
/// from the session, and unknown keys in the body are ignored.
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PostInput {
	#[serde(default)]
	pub text: String,
	pub group: Option<i64>,
	pub image: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentInput {
	#[serde(default)]
	pub text: String,
}

/// The declared post form: field names, kinds and whether they are
/// required. Clients render this instead of a server-side template.
fn post_form() -> serde_json::Value {
	json!({
		"fields": {
			"text": { "kind": "textarea", "required": true },
			"group": { "kind": "select", "required": false },
			"image": { "kind": "file", "required": false },
		}
	})
}

/// Checks the submitted form the way the form declares it: the text must
/// not be blank, and a group, if given, must exist.
async fn validate_post(
	database: &Database,
	input: &PostInput,
) -> Result<BTreeMap<&'static str, Vec<String>>, Error> {
	let mut errors = BTreeMap::<&'static str, Vec<String>>::new();

	if input.text.trim().is_empty() {
		errors
			.entry("text")
			.or_default()
			.push("this field is required".to_owned());
	}

	if let Some(group_id) = input.group {
		let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM groups WHERE id = ?)")
			.bind(group_id)
			.fetch_one(database)
			.await?;

		if !exists {
			errors
				.entry("group")
				.or_default()
				.push("select a valid group".to_owned());
		}
	}

	Ok(errors)
}

/// A failed submission is not an error status: the form comes back at 200
/// with the submitted values and per-field messages, and nothing persists.
fn rerender(
	input: &PostInput,
	errors: &BTreeMap<&'static str, Vec<String>>,
	is_edit: bool,
) -> Response {
	Json(json!({
		"form": post_form(),
		"values": input,
		"errors": errors,
		"is_edit": is_edit,
	}))
	.into_response()
}

/// Attachments arrive as a bare file name; only the stable relative path
/// under `posts/` is stored, never the bytes.
fn image_path(name: &str) -> Option<String> {
	let base = name.trim().rsplit('/').next().unwrap_or_default();

	(!base.is_empty()).then(|| format!("posts/{base}"))
}

fn to_post(post_id: i64) -> Response {
	Redirect::to(&format!("/posts/{post_id}/")).into_response()
}

fn to_profile(username: &str) -> Response {
	Redirect::to(&format!("/profile/{username}/")).into_response()
}

async fn fetch_for_edit(
	database: &Database,
	post_id: i64,
) -> Result<Option<(String, Option<i64>, Option<String>, i64)>, Error> {
	Ok(
		sqlx::query_as::<_, (String, Option<i64>, Option<String>, i64)>(
			"SELECT text, group_id, image, author_id FROM posts WHERE id = ?",
		)
		.bind(post_id)
		.fetch_optional(database)
		.await?,
	)
}

/// Returns one page of all posts, newest first.
pub async fn index(
	State(database): State<Database>,
	Query(query): Query<feed::PageQuery>,
) -> Result<Json<feed::Page<model::Post>>, Error> {
	Ok(Json(feed::global(&database, query.page).await?))
}

/// Returns a group and one page of its posts, newest first.
async fn group_feed(
	State(database): State<Database>,
	Path(slug): Path<String>,
	Query(query): Query<feed::PageQuery>,
) -> Result<Json<feed::GroupFeed>, Error> {
	Ok(Json(feed::group(&database, &slug, query.page).await?))
}

/// Returns a single post with its comments, newest first.
async fn post_detail(
	State(database): State<Database>,
	Path(post_id): Path<i64>,
) -> Result<Json<feed::PostDetail>, Error> {
	Ok(Json(feed::post_detail(&database, post_id).await?))
}

/// Returns the post form schema.
async fn create_form(_session: Session) -> Json<serde_json::Value> {
	Json(json!({ "form": post_form(), "is_edit": false }))
}

/// Creates a post authored by the session user and returns to their
/// profile.
async fn create_post(
	State(database): State<Database>,
	session: Session,
	Json(input): Json<PostInput>,
) -> Result<Response, Error> {
	let errors = validate_post(&database, &input).await?;

	if !errors.is_empty() {
		return Ok(rerender(&input, &errors, false));
	}

	sqlx::query(
		"INSERT INTO posts (text, pub_date, author_id, group_id, image) VALUES (?, ?, ?, ?, ?)",
	)
	.bind(&input.text)
	.bind(chrono::Utc::now())
	.bind(session.user.id)
	.bind(input.group)
	.bind(input.image.as_deref().and_then(image_path))
	.execute(&database)
	.await?;

	Ok(to_profile(&session.user.username))
}

/// Returns the post form with the post's current values.
///
/// Only the author may edit; everyone else is sent back to the post.
async fn edit_form(
	State(database): State<Database>,
	session: Session,
	Path(post_id): Path<i64>,
) -> Result<Response, Error> {
	let Some((text, group, image, author_id)) = fetch_for_edit(&database, post_id).await? else {
		return Err(Error::NotFound("post"));
	};

	if author_id != session.user.id {
		return Ok(to_post(post_id));
	}

	Ok(Json(json!({
		"form": post_form(),
		"values": { "text": text, "group": group, "image": image },
		"is_edit": true,
	}))
	.into_response())
}

/// Applies the submitted form to an existing post.
///
/// The publication date and authorship never change. A non-author is
/// silently redirected to the post instead of receiving an error.
async fn edit_post(
	State(database): State<Database>,
	session: Session,
	Path(post_id): Path<i64>,
	Json(input): Json<PostInput>,
) -> Result<Response, Error> {
	let Some((_, _, _, author_id)) = fetch_for_edit(&database, post_id).await? else {
		return Err(Error::NotFound("post"));
	};

	if author_id != session.user.id {
		return Ok(to_post(post_id));
	}

	let errors = validate_post(&database, &input).await?;

	if !errors.is_empty() {
		return Ok(rerender(&input, &errors, true));
	}

	sqlx::query("UPDATE posts SET text = ?, group_id = ?, image = ? WHERE id = ?")
		.bind(&input.text)
		.bind(input.group)
		.bind(input.image.as_deref().and_then(image_path))
		.bind(post_id)
		.execute(&database)
		.await?;

	Ok(to_post(post_id))
}

/// Deletes a post and, through the schema, its comments.
///
/// Author-only, with the same silent redirect as editing.
async fn delete_post(
	State(database): State<Database>,
	session: Session,
	Path(post_id): Path<i64>,
) -> Result<Response, Error> {
	let author_id: i64 = sqlx::query_scalar("SELECT author_id FROM posts WHERE id = ?")
		.bind(post_id)
		.fetch_optional(&database)
		.await?
		.ok_or(Error::NotFound("post"))?;

	if author_id != session.user.id {
		return Ok(to_post(post_id));
	}

	sqlx::query("DELETE FROM posts WHERE id = ?")
		.bind(post_id)
		.execute(&database)
		.await?;

	Ok(to_profile(&session.user.username))
}

/// Attaches a comment to a post, authored by the session user.
///
/// The response is the same redirect whether or not the text was
/// accepted; a blank comment is simply discarded.
async fn add_comment(
	State(database): State<Database>,
	session: Session,
	Path(post_id): Path<i64>,
	Json(input): Json<CommentInput>,
) -> Result<Response, Error> {
	let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM posts WHERE id = ?)")
		.bind(post_id)
		.fetch_one(&database)
		.await?;

	if !exists {
		return Err(Error::NotFound("post"));
	}

	if !input.text.trim().is_empty() {
		sqlx::query("INSERT INTO comments (text, created, post_id, author_id) VALUES (?, ?, ?, ?)")
			.bind(&input.text)
			.bind(chrono::Utc::now())
			.bind(post_id)
			.bind(session.user.id)
			.execute(&database)
			.await?;
	}

	Ok(to_post(post_id))
}

#[cfg(test)]
mod test {
	use crate::test::*;

	async fn post_count(pool: &Database) -> i64 {
		sqlx::query_scalar("SELECT COUNT(*) FROM posts")
			.fetch_one(pool)
			.await
			.unwrap()
	}

	async fn latest_post_id(pool: &Database) -> i64 {
		sqlx::query_scalar("SELECT id FROM posts ORDER BY id DESC LIMIT 1")
			.fetch_one(pool)
			.await
			.unwrap()
	}

	#[sqlx::test]
	async fn test_index_pagination(pool: Database) {
		let app = app(pool.clone());
		let alice = user(&pool, "alice").await;

		for n in 1..=14 {
			post(&pool, alice, None, &format!("post {n}")).await;
		}

		let body = app.get("/").await.json::<serde_json::Value>();

		assert_eq!(body["count"], 14);
		assert_eq!(body["number"], 1);
		assert_eq!(body["num_pages"], 2);
		assert_eq!(body["has_next"], true);
		assert_eq!(body["has_previous"], false);
		assert_eq!(body["results"].as_array().unwrap().len(), 10);
		assert_eq!(body["results"][0]["text"], "post 14");

		let body = app
			.get("/")
			.add_query_param("page", 2)
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["number"], 2);
		assert_eq!(body["has_next"], false);
		assert_eq!(body["has_previous"], true);
		assert_eq!(body["results"].as_array().unwrap().len(), 4);
		assert_eq!(body["results"][3]["text"], "post 1");

		// out-of-range pages, in either direction, land on the last page
		let body = app
			.get("/")
			.add_query_param("page", 99)
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["number"], 2);

		let body = app
			.get("/")
			.add_query_param("page", 0)
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["number"], 2);
	}

	#[sqlx::test]
	async fn test_non_numeric_page_is_an_error(pool: Database) {
		let app = app(pool);

		let response = app.get("/").add_query_param("page", "abc").await;

		assert_eq!(response.status_code(), 400);
	}

	#[sqlx::test]
	async fn test_empty_feed_has_one_page(pool: Database) {
		let app = app(pool);

		let body = app.get("/").await.json::<serde_json::Value>();

		assert_eq!(body["count"], 0);
		assert_eq!(body["number"], 1);
		assert_eq!(body["num_pages"], 1);
		assert_eq!(body["results"].as_array().unwrap().len(), 0);
	}

	#[sqlx::test]
	async fn test_group_feed_is_scoped(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		let literature = group(&pool, "Literature", "g1").await;
		group(&pool, "Music", "g2").await;

		let response = app
			.post("/create/")
			.json(&json!({ "text": "Hello", "group": literature }))
			.await;

		assert_eq!(response.status_code(), 303);

		// the post shows up on the global feed, its group's feed and the
		// author's profile, but not on another group's feed
		let body = app.get("/").await.json::<serde_json::Value>();

		assert_eq!(body["results"][0]["text"], "Hello");
		assert_eq!(body["results"][0]["group"]["slug"], "g1");

		let body = app.get("/group/g1/").await.json::<serde_json::Value>();

		assert_eq!(body["group"]["title"], "Literature");
		assert_eq!(body["page"]["count"], 1);
		assert_eq!(body["page"]["results"][0]["text"], "Hello");

		let body = app.get("/profile/alice/").await.json::<serde_json::Value>();

		assert_eq!(body["page"]["count"], 1);

		let body = app.get("/group/g2/").await.json::<serde_json::Value>();

		assert_eq!(body["page"]["count"], 0);

		let response = app.get("/group/missing/").await;

		assert_eq!(response.status_code(), 404);
	}

	#[sqlx::test]
	async fn test_post_detail(pool: Database) {
		let app = app(pool.clone());

		let alice = user(&pool, "alice").await;
		let bob = user(&pool, "bob").await;

		let first = post(&pool, alice, None, "first post").await;
		post(&pool, alice, None, "second post").await;

		comment(&pool, first, bob, "first comment").await;
		comment(&pool, first, bob, "second comment").await;

		let body = app
			.get(&format!("/posts/{first}/"))
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["post"]["text"], "first post");
		assert_eq!(body["post"]["author"]["username"], "alice");
		assert_eq!(body["posts_count"], 2);

		let comments = body["comments"].as_array().unwrap();

		assert_eq!(comments.len(), 2);
		assert_eq!(comments[0]["text"], "second comment");
		assert_eq!(comments[0]["author"]["username"], "bob");

		let response = app.get("/posts/999/").await;

		assert_eq!(response.status_code(), 404);
	}

	#[sqlx::test]
	async fn test_create_post_forces_the_session_author(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		let me = app.get("/auth/me/").await.json::<serde_json::Value>();

		// the author key in the body must be ignored
		let response = app
			.post("/create/")
			.json(&json!({
				"text": "mine",
				"image": "photos/small.gif",
				"author": 9999,
			}))
			.await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			"/profile/alice/"
		);

		let post_id = latest_post_id(&pool).await;
		let author_id: i64 = sqlx::query_scalar("SELECT author_id FROM posts WHERE id = ?")
			.bind(post_id)
			.fetch_one(&pool)
			.await
			.unwrap();

		assert_eq!(author_id, me["id"].as_i64().unwrap());

		let body = app
			.get(&format!("/posts/{post_id}/"))
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["post"]["image"], "posts/small.gif");
	}

	#[sqlx::test]
	async fn test_create_post_requires_login(pool: Database) {
		let app = app(pool.clone());

		let response = app.post("/create/").json(&json!({ "text": "drive-by" })).await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			"/auth/login/?next=/create/"
		);
		assert_eq!(post_count(&pool).await, 0);
	}

	#[sqlx::test]
	async fn test_invalid_post_rerenders_the_form(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		let response = app.post("/create/").json(&json!({ "text": "   " })).await;

		assert_eq!(response.status_code(), 200);

		let body = response.json::<serde_json::Value>();

		assert_eq!(body["values"]["text"], "   ");
		assert!(body["errors"]["text"][0].is_string());
		assert_eq!(body["is_edit"], false);
		assert_eq!(post_count(&pool).await, 0);

		// a group that does not exist is a field error, not a 404
		let response = app
			.post("/create/")
			.json(&json!({ "text": "fine", "group": 999 }))
			.await;

		assert_eq!(response.status_code(), 200);
		assert!(response.json::<serde_json::Value>()["errors"]["group"][0].is_string());
		assert_eq!(post_count(&pool).await, 0);
	}

	#[sqlx::test]
	async fn test_create_form_schema(pool: Database) {
		let app = app(pool);
		signup(&app, "alice").await;

		let body = app.get("/create/").await.json::<serde_json::Value>();

		assert_eq!(body["form"]["fields"]["text"]["required"], true);
		assert_eq!(body["is_edit"], false);
	}

	#[sqlx::test]
	async fn test_only_the_author_may_edit(pool: Database) {
		let state = state(pool.clone());
		let author = app_with_state(state.clone());
		let visitor = app_with_state(state);

		signup(&author, "alice").await;
		signup(&visitor, "bob").await;

		author
			.post("/create/")
			.json(&json!({ "text": "original" }))
			.await;

		let post_id = latest_post_id(&pool).await;
		let detail = format!("/posts/{post_id}/");

		let before = author.get(&detail).await.text();

		// a non-author lands back on the post, and nothing changes
		let response = visitor
			.post(&format!("/posts/{post_id}/edit/"))
			.json(&json!({ "text": "hijacked" }))
			.await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(response.header("location").to_str().unwrap(), detail);
		assert_eq!(author.get(&detail).await.text(), before);

		let response = visitor.get(&format!("/posts/{post_id}/edit/")).await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(response.header("location").to_str().unwrap(), detail);
	}

	#[sqlx::test]
	async fn test_author_edit_preserves_pub_date(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		let literature = group(&pool, "Literature", "g1").await;

		app.post("/create/")
			.json(&json!({ "text": "original", "group": literature }))
			.await;

		let post_id = latest_post_id(&pool).await;
		let detail = format!("/posts/{post_id}/");

		let before = app.get(&detail).await.json::<serde_json::Value>();

		let response = app
			.post(&format!("/posts/{post_id}/edit/"))
			.json(&json!({ "text": "edited" }))
			.await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(response.header("location").to_str().unwrap(), detail);

		let after = app.get(&detail).await.json::<serde_json::Value>();

		assert_eq!(after["post"]["text"], "edited");
		assert_eq!(after["post"]["pub_date"], before["post"]["pub_date"]);
		assert_eq!(after["post"]["author"]["username"], "alice");

		// the form replaces every field, so the omitted group is cleared
		assert_eq!(after["post"]["group"], serde_json::Value::Null);
	}

	#[sqlx::test]
	async fn test_invalid_edit_changes_nothing(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		app.post("/create/").json(&json!({ "text": "original" })).await;

		let post_id = latest_post_id(&pool).await;

		let response = app
			.post(&format!("/posts/{post_id}/edit/"))
			.json(&json!({ "text": "" }))
			.await;

		assert_eq!(response.status_code(), 200);

		let body = response.json::<serde_json::Value>();

		assert!(body["errors"]["text"][0].is_string());
		assert_eq!(body["is_edit"], true);

		let text: String = sqlx::query_scalar("SELECT text FROM posts WHERE id = ?")
			.bind(post_id)
			.fetch_one(&pool)
			.await
			.unwrap();

		assert_eq!(text, "original");
	}

	#[sqlx::test]
	async fn test_edit_form_returns_current_values(pool: Database) {
		let app = app(pool.clone());
		signup(&app, "alice").await;

		app.post("/create/")
			.json(&json!({ "text": "original", "image": "small.gif" }))
			.await;

		let post_id = latest_post_id(&pool).await;

		let body = app
			.get(&format!("/posts/{post_id}/edit/"))
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["values"]["text"], "original");
		assert_eq!(body["values"]["image"], "posts/small.gif");
		assert_eq!(body["is_edit"], true);
	}

	#[sqlx::test]
	async fn test_delete_cascades_to_comments(pool: Database) {
		let state = state(pool.clone());
		let author = app_with_state(state.clone());
		let visitor = app_with_state(state);

		signup(&author, "alice").await;
		signup(&visitor, "bob").await;

		author.post("/create/").json(&json!({ "text": "mine" })).await;

		let post_id = latest_post_id(&pool).await;

		visitor
			.post(&format!("/posts/{post_id}/comment/"))
			.json(&json!({ "text": "a comment" }))
			.await;

		// a non-author cannot delete
		let response = visitor.post(&format!("/posts/{post_id}/delete/")).await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			format!("/posts/{post_id}/")
		);
		assert_eq!(post_count(&pool).await, 1);

		let response = author.post(&format!("/posts/{post_id}/delete/")).await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			"/profile/alice/"
		);

		let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
			.fetch_one(&pool)
			.await
			.unwrap();

		assert_eq!(post_count(&pool).await, 0);
		assert_eq!(comments, 0);

		let response = author.get(&format!("/posts/{post_id}/")).await;

		assert_eq!(response.status_code(), 404);
	}

	#[sqlx::test]
	async fn test_comments_always_redirect_to_the_post(pool: Database) {
		let app = app(pool.clone());

		let alice = user(&pool, "alice").await;
		let post_id = post(&pool, alice, None, "a post").await;

		// guests are sent to the login form instead
		let response = app
			.post(&format!("/posts/{post_id}/comment/"))
			.json(&json!({ "text": "anonymous" }))
			.await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			format!("/auth/login/?next=/posts/{post_id}/comment/")
		);

		signup(&app, "bob").await;

		// a blank comment is discarded, with the same redirect
		let response = app
			.post(&format!("/posts/{post_id}/comment/"))
			.json(&json!({ "text": "   " }))
			.await;

		assert_eq!(response.status_code(), 303);
		assert_eq!(
			response.header("location").to_str().unwrap(),
			format!("/posts/{post_id}/")
		);

		let body = app
			.get(&format!("/posts/{post_id}/"))
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["comments"].as_array().unwrap().len(), 0);

		let response = app
			.post(&format!("/posts/{post_id}/comment/"))
			.json(&json!({ "text": "a real comment" }))
			.await;

		assert_eq!(response.status_code(), 303);

		let body = app
			.get(&format!("/posts/{post_id}/"))
			.await
			.json::<serde_json::Value>();

		let comments = body["comments"].as_array().unwrap();

		assert_eq!(comments.len(), 1);
		assert_eq!(comments[0]["text"], "a real comment");
		assert_eq!(comments[0]["author"]["username"], "bob");
	}

	#[sqlx::test]
	async fn test_deleting_a_group_keeps_its_posts(pool: Database) {
		let app = app(pool.clone());

		let alice = user(&pool, "alice").await;
		let literature = group(&pool, "Literature", "g1").await;
		let post_id = post(&pool, alice, Some(literature), "grouped").await;

		sqlx::query("DELETE FROM groups WHERE id = ?")
			.bind(literature)
			.execute(&pool)
			.await
			.unwrap();

		let body = app
			.get(&format!("/posts/{post_id}/"))
			.await
			.json::<serde_json::Value>();

		assert_eq!(body["post"]["text"], "grouped");
		assert_eq!(body["post"]["group"], serde_json::Value::Null);
	}

	#[sqlx::test]
	async fn test_missing_posts_are_not_found(pool: Database) {
		let app = app(pool);
		signup(&app, "alice").await;

		assert_eq!(app.get("/posts/999/").await.status_code(), 404);
		assert_eq!(
			app.post("/posts/999/edit/")
				.json(&json!({ "text": "x" }))
				.await
				.status_code(),
			404
		);
		assert_eq!(app.post("/posts/999/delete/").await.status_code(), 404);
		assert_eq!(
			app.post("/posts/999/comment/")
				.json(&json!({ "text": "x" }))
				.await
				.status_code(),
			404
		);
	}

	#[sqlx::test]
	async fn test_unknown_paths_are_not_found(pool: Database) {
		let app = app(pool);

		let response = app.get("/nope/").await;

		assert_eq!(response.status_code(), 404);

		let body = response.json::<serde_json::Value>();

		assert_eq!(body["success"], false);
	}
}
