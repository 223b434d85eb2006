use crate::{Database, Error};

/// Adds a follow edge from `user_id` to the named author.
///
/// Idempotent: the unique (user, author) pair turns a repeated follow
/// into a no-op, and following yourself changes nothing.
pub async fn follow(database: &Database, user_id: i64, author: &str) -> Result<(), Error> {
	let author_id = author_id(database, author).await?;

	if author_id == user_id {
		return Ok(());
	}

	sqlx::query(
		r#"
		INSERT INTO follows (user_id, author_id)
		VALUES (?, ?)
		ON CONFLICT (user_id, author_id) DO NOTHING
		"#,
	)
	.bind(user_id)
	.bind(author_id)
	.execute(database)
	.await?;

	Ok(())
}

/// Removes the follow edge from `user_id` to the named author.
///
/// Removing an absent edge is a no-op.
pub async fn unfollow(database: &Database, user_id: i64, author: &str) -> Result<(), Error> {
	let author_id = author_id(database, author).await?;

	sqlx::query("DELETE FROM follows WHERE user_id = ? AND author_id = ?")
		.bind(user_id)
		.bind(author_id)
		.execute(database)
		.await?;

	Ok(())
}

/// Whether `user_id` currently follows `author_id`.
pub async fn is_following(database: &Database, user_id: i64, author_id: i64) -> Result<bool, Error> {
	let following: bool = sqlx::query_scalar(
		"SELECT EXISTS (SELECT 1 FROM follows WHERE user_id = ? AND author_id = ?)",
	)
	.bind(user_id)
	.bind(author_id)
	.fetch_one(database)
	.await?;

	Ok(following)
}

async fn author_id(database: &Database, username: &str) -> Result<i64, Error> {
	sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
		.bind(username)
		.fetch_optional(database)
		.await?
		.ok_or(Error::NotFound("user"))
}
