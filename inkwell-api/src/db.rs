use async_trait::async_trait;

use crate::{CommentId, PostId, UserId};

/// Ownership information about a comment, enough to run authorization checks
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommentMeta {
    pub id: CommentId,
    pub post: PostId,
    pub author: UserId,
    pub parent: Option<CommentId>,
}

/// Comment store, as needed by the operations shared between server and mock server
#[async_trait]
pub trait Db {
    async fn post_author(&mut self, post: PostId) -> anyhow::Result<Option<UserId>>;
    async fn comment_meta(&mut self, comment: CommentId) -> anyhow::Result<Option<CommentMeta>>;
    async fn list_replies(&mut self, parent: CommentId) -> anyhow::Result<Vec<CommentId>>;

    /// Returns whether the comment existed
    async fn remove_comment(&mut self, comment: CommentId) -> anyhow::Result<bool>;
}
