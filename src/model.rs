use chrono::{DateTime, Utc};
use serde::Serialize;

/// A model representing a single user.
///
/// Use this when fetching from the database and returning to the client.
/// The `password_hash` field is not serialized to the client.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct User {
	pub id: i64,
	pub username: String,
	#[serde(skip_serializing)]
	pub password_hash: String,
	pub created_at: DateTime<Utc>,
}

/// A topic group. Groups are created out of band and never change once
/// posts reference them.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Group {
	pub id: i64,
	pub title: String,
	pub slug: String,
	pub description: String,
}

/// The public author fields embedded in posts and comments.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Author {
	pub id: i64,
	pub username: String,
}

/// A post row joined with its author and optional group.
#[derive(Debug, sqlx::FromRow)]
pub struct PostRow {
	pub id: i64,
	pub text: String,
	pub pub_date: DateTime<Utc>,
	pub image: Option<String>,
	pub author_id: i64,
	pub author_username: String,
	pub group_id: Option<i64>,
	pub group_title: Option<String>,
	pub group_slug: Option<String>,
}

/// A single post as returned to the client.
#[derive(Debug, Serialize)]
pub struct Post {
	pub id: i64,
	pub text: String,
	pub pub_date: DateTime<Utc>,
	pub image: Option<String>,
	pub author: Author,
	pub group: Option<PostGroup>,
}

/// The group fields embedded in a post.
#[derive(Debug, Serialize)]
pub struct PostGroup {
	pub id: i64,
	pub title: String,
	pub slug: String,
}

impl From<PostRow> for Post {
	fn from(row: PostRow) -> Self {
		let group = match (row.group_id, row.group_title, row.group_slug) {
			(Some(id), Some(title), Some(slug)) => Some(PostGroup { id, title, slug }),
			_ => None,
		};

		Self {
			id: row.id,
			text: row.text,
			pub_date: row.pub_date,
			image: row.image,
			author: Author {
				id: row.author_id,
				username: row.author_username,
			},
			group,
		}
	}
}

/// A comment row joined with its author.
#[derive(Debug, sqlx::FromRow)]
pub struct CommentRow {
	pub id: i64,
	pub text: String,
	pub created: DateTime<Utc>,
	pub author_id: i64,
	pub author_username: String,
}

/// A single comment as returned to the client.
#[derive(Debug, Serialize)]
pub struct Comment {
	pub id: i64,
	pub text: String,
	pub created: DateTime<Utc>,
	pub author: Author,
}

impl From<CommentRow> for Comment {
	fn from(row: CommentRow) -> Self {
		Self {
			id: row.id,
			text: row.text,
			created: row.created,
			author: Author {
				id: row.author_id,
				username: row.author_username,
			},
		}
	}
}
