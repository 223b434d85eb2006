use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{model, social, Database, Error};

/// The number of posts on every feed page.
pub const POSTS_PER_PAGE: i64 = 10;

/// Every feed reads the same joined row: the post, its author and its
/// optional group, in one query.
const SELECT_POSTS: &str = r#"
	SELECT
		posts.id, posts.text, posts.pub_date, posts.image,
		users.id AS author_id, users.username AS author_username,
		groups.id AS group_id, groups.title AS group_title, groups.slug AS group_slug
	FROM posts
	JOIN users ON users.id = posts.author_id
	LEFT JOIN groups ON groups.id = posts.group_id
"#;

const ORDER_NEWEST: &str = "ORDER BY posts.pub_date DESC, posts.id DESC LIMIT ? OFFSET ?";

/// This can be removed when [`serde`] supports
/// literal defaults: <https://github.com/serde-rs/serde/issues/368>
fn one() -> i64 {
	1
}

/// The `page` query parameter accepted by every feed route.
///
/// Out-of-range values land on the last page rather than being
/// rejected; only a non-numeric value is a request error.
#[derive(Debug, Deserialize, Validate)]
pub struct PageQuery {
	#[serde(default = "one")]
	pub page: i64,
}

/// One page of a feed.
#[derive(Debug, Serialize)]
pub struct Page<T> {
	pub count: i64,
	pub number: i64,
	pub num_pages: i64,
	pub has_next: bool,
	pub has_previous: bool,
	pub results: Vec<T>,
}

impl<T> Page<T> {
	fn new(results: Vec<T>, count: i64, number: i64, num_pages: i64) -> Self {
		Self {
			count,
			number,
			num_pages,
			has_next: number < num_pages,
			has_previous: number > 1,
			results,
		}
	}
}

/// A group and one page of its posts.
#[derive(Debug, Serialize)]
pub struct GroupFeed {
	pub group: model::Group,
	pub page: Page<model::Post>,
}

/// An author, whether the viewer follows them, and one page of their posts.
#[derive(Debug, Serialize)]
pub struct ProfileFeed {
	pub author: model::Author,
	pub following: bool,
	pub page: Page<model::Post>,
}

/// A single post with its comments and the author's total post count.
#[derive(Debug, Serialize)]
pub struct PostDetail {
	pub post: model::Post,
	pub posts_count: i64,
	pub comments: Vec<model::Comment>,
}

/// Sends an out-of-range page number, in either direction, to the last
/// page.
///
/// An empty result set still has one (empty) page, so `num_pages` is
/// never zero.
fn clamp_page(count: i64, requested: i64) -> (i64, i64) {
	let num_pages = ((count + POSTS_PER_PAGE - 1) / POSTS_PER_PAGE).max(1);

	if (1..=num_pages).contains(&requested) {
		(requested, num_pages)
	} else {
		(num_pages, num_pages)
	}
}

fn offset(number: i64) -> i64 {
	(number - 1) * POSTS_PER_PAGE
}

/// All posts, newest first.
pub async fn global(database: &Database, page: i64) -> Result<Page<model::Post>, Error> {
	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
		.fetch_one(database)
		.await?;

	let (number, num_pages) = clamp_page(count, page);

	let posts = sqlx::query_as::<_, model::PostRow>(&format!("{SELECT_POSTS} {ORDER_NEWEST}"))
		.bind(POSTS_PER_PAGE)
		.bind(offset(number))
		.fetch_all(database)
		.await?;

	Ok(Page::new(
		posts.into_iter().map(Into::into).collect(),
		count,
		number,
		num_pages,
	))
}

/// A group's posts, newest first.
pub async fn group(database: &Database, slug: &str, page: i64) -> Result<GroupFeed, Error> {
	let group = sqlx::query_as::<_, model::Group>("SELECT * FROM groups WHERE slug = ?")
		.bind(slug)
		.fetch_optional(database)
		.await?
		.ok_or(Error::NotFound("group"))?;

	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE group_id = ?")
		.bind(group.id)
		.fetch_one(database)
		.await?;

	let (number, num_pages) = clamp_page(count, page);

	let posts = sqlx::query_as::<_, model::PostRow>(&format!(
		"{SELECT_POSTS} WHERE posts.group_id = ? {ORDER_NEWEST}"
	))
	.bind(group.id)
	.bind(POSTS_PER_PAGE)
	.bind(offset(number))
	.fetch_all(database)
	.await?;

	Ok(GroupFeed {
		group,
		page: Page::new(
			posts.into_iter().map(Into::into).collect(),
			count,
			number,
			num_pages,
		),
	})
}

/// An author's posts, newest first.
///
/// `following` is whether the viewer follows the author; it is always
/// false for anonymous viewers.
pub async fn profile(
	database: &Database,
	viewer: Option<i64>,
	username: &str,
	page: i64,
) -> Result<ProfileFeed, Error> {
	let author =
		sqlx::query_as::<_, model::Author>("SELECT id, username FROM users WHERE username = ?")
			.bind(username)
			.fetch_optional(database)
			.await?
			.ok_or(Error::NotFound("user"))?;

	let following = match viewer {
		Some(viewer) => social::is_following(database, viewer, author.id).await?,
		None => false,
	};

	let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE author_id = ?")
		.bind(author.id)
		.fetch_one(database)
		.await?;

	let (number, num_pages) = clamp_page(count, page);

	let posts = sqlx::query_as::<_, model::PostRow>(&format!(
		"{SELECT_POSTS} WHERE posts.author_id = ? {ORDER_NEWEST}"
	))
	.bind(author.id)
	.bind(POSTS_PER_PAGE)
	.bind(offset(number))
	.fetch_all(database)
	.await?;

	Ok(ProfileFeed {
		author,
		following,
		page: Page::new(
			posts.into_iter().map(Into::into).collect(),
			count,
			number,
			num_pages,
		),
	})
}

/// Posts by the authors the viewer follows, newest first.
pub async fn following(
	database: &Database,
	viewer: i64,
	page: i64,
) -> Result<Page<model::Post>, Error> {
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM posts WHERE author_id IN (SELECT author_id FROM follows WHERE user_id = ?)",
	)
	.bind(viewer)
	.fetch_one(database)
	.await?;

	let (number, num_pages) = clamp_page(count, page);

	let posts = sqlx::query_as::<_, model::PostRow>(&format!(
		"{SELECT_POSTS} WHERE posts.author_id IN (SELECT author_id FROM follows WHERE user_id = ?) {ORDER_NEWEST}"
	))
	.bind(viewer)
	.bind(POSTS_PER_PAGE)
	.bind(offset(number))
	.fetch_all(database)
	.await?;

	Ok(Page::new(
		posts.into_iter().map(Into::into).collect(),
		count,
		number,
		num_pages,
	))
}

/// A single post with its comments, newest comment first.
pub async fn post_detail(database: &Database, post_id: i64) -> Result<PostDetail, Error> {
	let post: model::Post =
		sqlx::query_as::<_, model::PostRow>(&format!("{SELECT_POSTS} WHERE posts.id = ?"))
			.bind(post_id)
			.fetch_optional(database)
			.await?
			.ok_or(Error::NotFound("post"))?
			.into();

	let posts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE author_id = ?")
		.bind(post.author.id)
		.fetch_one(database)
		.await?;

	let comments = sqlx::query_as::<_, model::CommentRow>(
		r#"
		SELECT
			comments.id, comments.text, comments.created,
			users.id AS author_id, users.username AS author_username
		FROM comments
		JOIN users ON users.id = comments.author_id
		WHERE comments.post_id = ?
		ORDER BY comments.created DESC, comments.id DESC
		"#,
	)
	.bind(post_id)
	.fetch_all(database)
	.await?;

	Ok(PostDetail {
		post,
		posts_count,
		comments: comments.into_iter().map(Into::into).collect(),
	})
}
