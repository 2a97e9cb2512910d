use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use inkwell_api::{
    AuthToken, Comment, CommentId, CommentMeta, Db, Error as ApiError, LikeStatus, Post, PostId,
    Time, User, UserId, Uuid,
};
use sqlx::{postgres::PgRow, Row};

use crate::Error;

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

#[async_trait]
impl<'a> Db for PostgresDb<'a> {
    async fn post_author(&mut self, post: PostId) -> anyhow::Result<Option<UserId>> {
        Ok(sqlx::query("SELECT author_id FROM posts WHERE id = $1")
            .bind(post.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying author of post {:?}", post))?
            .map(|r| r.try_get("author_id").map(UserId))
            .transpose()
            .context("retrieving the author_id field")?)
    }

    async fn comment_meta(&mut self, comment: CommentId) -> anyhow::Result<Option<CommentMeta>> {
        let row = sqlx::query("SELECT id, post_id, author_id, parent_id FROM comments WHERE id = $1")
            .bind(comment.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying metadata of comment {:?}", comment))?;
        let row = match row {
            None => return Ok(None),
            Some(row) => row,
        };
        Ok(Some(CommentMeta {
            id: CommentId(row.try_get("id").context("retrieving the id field")?),
            post: PostId(row.try_get("post_id").context("retrieving the post_id field")?),
            author: UserId(
                row.try_get("author_id")
                    .context("retrieving the author_id field")?,
            ),
            parent: row
                .try_get::<Option<Uuid>, _>("parent_id")
                .context("retrieving the parent_id field")?
                .map(CommentId),
        }))
    }

    async fn list_replies(&mut self, parent: CommentId) -> anyhow::Result<Vec<CommentId>> {
        let mut res = Vec::new();
        let mut rows = sqlx::query("SELECT id FROM comments WHERE parent_id = $1 ORDER BY seq")
            .bind(parent.0)
            .fetch(&mut *self.conn);
        while let Some(r) = rows
            .try_next()
            .await
            .with_context(|| format!("listing replies to {:?}", parent))?
        {
            res.push(CommentId(r.try_get("id").context("retrieving the id field")?));
        }
        Ok(res)
    }

    async fn remove_comment(&mut self, comment: CommentId) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting comment {:?}", comment))?;
        Ok(res.rows_affected() > 0)
    }
}

pub async fn create_user(
    conn: &mut sqlx::PgConnection,
    user: &User,
    email: &str,
    password_hash: &str,
) -> anyhow::Result<Result<(), ApiError>> {
    let res = sqlx::query(
        "INSERT INTO users VALUES ($1, $2, $3, $4) ON CONFLICT (email) DO NOTHING",
    )
    .bind(user.id.0)
    .bind(&user.name)
    .bind(email)
    .bind(password_hash)
    .execute(conn)
    .await
    .with_context(|| format!("inserting user {:?}", user.id))?;
    match res.rows_affected() {
        1 => Ok(Ok(())),
        _ => Ok(Err(ApiError::EmailAlreadyUsed(String::from(email)))),
    }
}

/// Returns the user with this email along with their password hash
pub async fn find_user_by_email(
    conn: &mut sqlx::PgConnection,
    email: &str,
) -> anyhow::Result<Option<(User, String)>> {
    let row = sqlx::query("SELECT id, name, password_hash FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(conn)
        .await
        .context("querying users table")?;
    let row = match row {
        None => return Ok(None),
        Some(row) => row,
    };
    let user = User {
        id: UserId(row.try_get("id").context("retrieving the id field")?),
        name: row.try_get("name").context("retrieving the name field")?,
    };
    let hash = row
        .try_get("password_hash")
        .context("retrieving the password_hash field")?;
    Ok(Some((user, hash)))
}

pub async fn create_session(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    device: &str,
) -> anyhow::Result<AuthToken> {
    let token = AuthToken(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, $4, $4)")
        .bind(token.0)
        .bind(user.0)
        .bind(device)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("opening session for user {:?}", user))?;
    Ok(token)
}

pub async fn logout_user(conn: &mut sqlx::PgConnection, token: &AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("closing session")?;
    Ok(res.rows_affected() > 0)
}

pub async fn recover_session(conn: &mut sqlx::PgConnection, token: AuthToken) -> Result<User, Error> {
    let row = sqlx::query(
        "
            UPDATE sessions
                SET last_active = $1
                FROM users
            WHERE sessions.id = $2
                AND users.id = sessions.user_id
            RETURNING users.id, users.name
        ",
    )
    .bind(Utc::now())
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .context("recovering session")?
    .ok_or(Error::unauthorized())?;
    Ok(User {
        id: UserId(row.try_get("id").context("retrieving the id field")?),
        name: row.try_get("name").context("retrieving the name field")?,
    })
}

const POST_QUERY: &str = "
    SELECT
        p.id, p.title, p.content, p.created_at, p.updated_at,
        u.id AS author_id,
        u.name AS author_name,
        (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS likes
    FROM posts p
    INNER JOIN users u
        ON u.id = p.author_id
";

fn post_from_row(row: &PgRow) -> anyhow::Result<Post> {
    Ok(Post {
        id: PostId(row.try_get("id").context("retrieving the id field")?),
        author: User {
            id: UserId(
                row.try_get("author_id")
                    .context("retrieving the author_id field")?,
            ),
            name: row
                .try_get("author_name")
                .context("retrieving the author_name field")?,
        },
        title: row.try_get("title").context("retrieving the title field")?,
        content: row
            .try_get("content")
            .context("retrieving the content field")?,
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        updated_at: row
            .try_get("updated_at")
            .context("retrieving the updated_at field")?,
        likes: row.try_get("likes").context("retrieving the likes field")?,
    })
}

pub async fn list_posts(conn: &mut sqlx::PgConnection) -> anyhow::Result<Vec<Post>> {
    let mut res = Vec::new();
    let query = format!("{POST_QUERY} ORDER BY p.created_at DESC, p.seq DESC");
    let mut rows = sqlx::query(&query).fetch(conn);
    while let Some(r) = rows.try_next().await.context("querying posts table")? {
        res.push(post_from_row(&r)?);
    }
    Ok(res)
}

pub async fn fetch_post(conn: &mut sqlx::PgConnection, post: PostId) -> anyhow::Result<Option<Post>> {
    let query = format!("{POST_QUERY} WHERE p.id = $1");
    sqlx::query(&query)
        .bind(post.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying post {:?}", post))?
        .map(|r| post_from_row(&r))
        .transpose()
}

pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    title: &str,
    content: &str,
) -> anyhow::Result<PostId> {
    let id = PostId(Uuid::new_v4());
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO posts (id, author_id, title, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)",
    )
    .bind(id.0)
    .bind(author.0)
    .bind(title)
    .bind(content)
    .bind(now)
    .execute(conn)
    .await
    .with_context(|| format!("inserting post {:?}", id))?;
    Ok(id)
}

pub async fn update_post(
    conn: &mut sqlx::PgConnection,
    post: PostId,
    title: &str,
    content: &str,
) -> anyhow::Result<()> {
    let res = sqlx::query("UPDATE posts SET title = $1, content = $2, updated_at = $3 WHERE id = $4")
        .bind(title)
        .bind(content)
        .bind(Utc::now())
        .bind(post.0)
        .execute(conn)
        .await
        .with_context(|| format!("updating post {:?}", post))?;
    anyhow::ensure!(
        res.rows_affected() == 1,
        "update of post {:?} affected {} rows",
        post,
        res.rows_affected()
    );
    Ok(())
}

/// Comments and likes go away with the post, through the foreign keys
pub async fn delete_post(conn: &mut sqlx::PgConnection, post: PostId) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting post {:?}", post))?;
    Ok(())
}

pub async fn toggle_like(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    post: PostId,
) -> anyhow::Result<LikeStatus> {
    let removed = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
        .bind(user.0)
        .bind(post.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("removing like of {:?} on {:?}", user, post))?
        .rows_affected();
    if removed == 0 {
        sqlx::query("INSERT INTO likes VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user.0)
            .bind(post.0)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("adding like of {:?} on {:?}", user, post))?;
    }
    let likes = sqlx::query("SELECT COUNT(*) AS likes FROM likes WHERE post_id = $1")
        .bind(post.0)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("counting likes on {:?}", post))?
        .try_get("likes")
        .context("retrieving the likes field")?;
    Ok(LikeStatus {
        liked: removed == 0,
        likes,
    })
}

const COMMENT_QUERY: &str = "
    SELECT
        c.id, c.text, c.post_id, c.parent_id, c.created_at,
        u.id AS author_id,
        u.name AS author_name
    FROM comments c
    INNER JOIN users u
        ON u.id = c.author_id
";

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: CommentId(row.try_get("id").context("retrieving the id field")?),
        text: row.try_get("text").context("retrieving the text field")?,
        post_id: PostId(row.try_get("post_id").context("retrieving the post_id field")?),
        author: User {
            id: UserId(
                row.try_get("author_id")
                    .context("retrieving the author_id field")?,
            ),
            name: row
                .try_get("author_name")
                .context("retrieving the author_name field")?,
        },
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
    })
}

/// All comments of `post`, oldest first
pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> anyhow::Result<Vec<Comment>> {
    let mut res = Vec::new();
    let query = format!("{COMMENT_QUERY} WHERE c.post_id = $1 ORDER BY c.created_at, c.seq");
    let mut rows = sqlx::query(&query).bind(post.0).fetch(conn);
    while let Some(r) = rows
        .try_next()
        .await
        .with_context(|| format!("querying comments of {:?}", post))?
    {
        res.push(comment_from_row(&r)?);
    }
    Ok(res)
}

pub async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<Comment>> {
    let query = format!("{COMMENT_QUERY} WHERE c.id = $1");
    sqlx::query(&query)
        .bind(comment.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying comment {:?}", comment))?
        .map(|r| comment_from_row(&r))
        .transpose()
}

pub async fn insert_comment(
    conn: &mut sqlx::PgConnection,
    post: PostId,
    author: UserId,
    parent: Option<CommentId>,
    text: &str,
    created_at: Time,
) -> anyhow::Result<CommentId> {
    let id = CommentId(Uuid::new_v4());
    sqlx::query(
        "INSERT INTO comments (id, post_id, author_id, parent_id, text, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id.0)
    .bind(post.0)
    .bind(author.0)
    .bind(parent.map(|p| p.0))
    .bind(text)
    .bind(created_at)
    .execute(conn)
    .await
    .with_context(|| format!("inserting comment {:?}", id))?;
    Ok(id)
}

pub async fn update_comment_text(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
    text: &str,
) -> anyhow::Result<()> {
    let res = sqlx::query("UPDATE comments SET text = $1 WHERE id = $2")
        .bind(text)
        .bind(comment.0)
        .execute(conn)
        .await
        .with_context(|| format!("updating comment {:?}", comment))?;
    anyhow::ensure!(
        res.rows_affected() == 1,
        "update of comment {:?} affected {} rows",
        comment,
        res.rows_affected()
    );
    Ok(())
}
