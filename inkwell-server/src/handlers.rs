use anyhow::Context;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use inkwell_api::{
    delete_comment_tree, AuthInfo, Comment, CommentId, EditComment, LikeStatus, NewComment,
    NewPost, NewSession, NewUser, Post, PostId, SessionInfo, User, UserId, Uuid,
};
use sqlx::Connection;

use crate::{db, extractors::*, Error};

pub async fn register(
    State(BcryptCost(cost)): State<BcryptCost>,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<Json<SessionInfo>, Error> {
    data.validate()?;
    let password = data.password;
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("joining password hashing task")?
        .context("hashing password")?;
    let user = User {
        id: UserId(Uuid::new_v4()),
        name: data.name,
    };
    db::create_user(&mut *conn, &user, &data.email, &hash)
        .await
        .with_context(|| format!("creating user {:?}", user.id))??;
    let token = db::create_session(&mut *conn, user.id, "registration").await?;
    tracing::info!(user = ?user.id, "registered new user");
    Ok(Json(SessionInfo {
        user,
        email: data.email,
        token,
    }))
}

pub async fn login(mut conn: PgConn, Json(data): Json<NewSession>) -> Result<Json<SessionInfo>, Error> {
    data.validate()?;
    let (user, hash) = db::find_user_by_email(&mut *conn, &data.email)
        .await?
        .ok_or(Error::unauthorized())?;
    let password = data.password;
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("joining password verification task")?
        .context("verifying password")?;
    if !valid {
        return Err(Error::unauthorized());
    }
    let token = db::create_session(&mut *conn, user.id, &data.device).await?;
    Ok(Json(SessionInfo {
        user,
        email: data.email,
        token,
    }))
}

pub async fn logout(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, &user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::unauthorized()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<User> {
    Json(user)
}

pub async fn list_posts(mut conn: PgConn) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(db::list_posts(&mut *conn).await?))
}

async fn get_post(conn: &mut sqlx::PgConnection, post: PostId) -> Result<Post, Error> {
    db::fetch_post(&mut *conn, post)
        .await?
        .ok_or_else(|| Error::post_not_found(post))
}

pub async fn fetch_post(mut conn: PgConn, Path(post): Path<Uuid>) -> Result<Json<Post>, Error> {
    Ok(Json(get_post(&mut *conn, PostId(post)).await?))
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    data.validate()?;
    let post = db::create_post(&mut *conn, user.id, &data.title, &data.content).await?;
    Ok(Json(get_post(&mut *conn, post).await?))
}

pub async fn edit_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    data.validate()?;
    let post = get_post(&mut *conn, PostId(post)).await?;
    if !AuthInfo::for_post(Some(user.id), post.author.id).can_edit {
        return Err(Error::permission_denied());
    }
    db::update_post(&mut *conn, post.id, &data.title, &data.content).await?;
    Ok(Json(get_post(&mut *conn, post.id).await?))
}

pub async fn delete_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<(), Error> {
    let post = get_post(&mut *conn, PostId(post)).await?;
    if !AuthInfo::for_post(Some(user.id), post.author.id).can_delete {
        return Err(Error::permission_denied());
    }
    db::delete_post(&mut *conn, post.id).await?;
    Ok(())
}

pub async fn toggle_like(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<Json<LikeStatus>, Error> {
    let post = get_post(&mut *conn, PostId(post)).await?;
    Ok(Json(db::toggle_like(&mut *conn, user.id, post.id).await?))
}

pub async fn fetch_comments(
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    let post = get_post(&mut *conn, PostId(post)).await?;
    Ok(Json(db::fetch_comments(&mut *conn, post.id).await?))
}

pub async fn add_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    data.validate()?;
    let post = get_post(&mut *conn, PostId(post)).await?;
    if let Some(parent) = data.parent_id {
        let parent = db::fetch_comment(&mut *conn, parent)
            .await?
            .ok_or_else(|| Error::comment_not_found(parent))?;
        if parent.post_id != post.id {
            return Err(Error::Api(inkwell_api::Error::ParentNotInPost(parent.id)));
        }
    }
    let id = db::insert_comment(
        &mut *conn,
        post.id,
        user.id,
        data.parent_id,
        &data.text,
        Utc::now(),
    )
    .await?;
    Ok(Json(
        db::fetch_comment(&mut *conn, id)
            .await?
            .with_context(|| format!("comment {:?} vanished right after insertion", id))?,
    ))
}

pub async fn edit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<EditComment>,
) -> Result<Json<Comment>, Error> {
    data.validate()?;
    let comment = db::fetch_comment(&mut *conn, CommentId(comment))
        .await?
        .ok_or_else(|| Error::comment_not_found(CommentId(comment)))?;
    let post = get_post(&mut *conn, comment.post_id).await?;
    if !AuthInfo::for_comment(Some(user.id), comment.author.id, post.author.id).can_edit {
        return Err(Error::permission_denied());
    }
    db::update_comment_text(&mut *conn, comment.id, &data.text).await?;
    Ok(Json(Comment {
        text: data.text,
        ..comment
    }))
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    let comment = CommentId(comment);
    let mut tx = conn.begin().await.context("starting transaction")?;
    let res = delete_comment_tree(&mut db::PostgresDb { conn: &mut *tx }, user.id, comment)
        .await
        .with_context(|| format!("deleting comment tree of {:?}", comment))?;
    match res {
        Ok(()) => {
            tx.commit().await.context("committing comment deletion")?;
            Ok(())
        }
        Err(e) => {
            tx.rollback()
                .await
                .context("rolling back refused comment deletion")?;
            Err(Error::Api(e))
        }
    }
}
