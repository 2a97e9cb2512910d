use anyhow::Context;

use crate::{AuthInfo, CommentId, Db, Error, UserId};

/// Deletes `comment` along with all of its replies, transitively, on behalf of `actor`
///
/// Replies are always removed before the comment they answer. The inner `Err` is
/// for errors to report to the user; the outer one for store failures, after which
/// some replies may already be gone.
pub async fn delete_comment_tree<D: Db + Send>(
    db: &mut D,
    actor: UserId,
    comment: CommentId,
) -> anyhow::Result<Result<(), Error>> {
    let meta = match db
        .comment_meta(comment)
        .await
        .with_context(|| format!("fetching metadata of comment {:?}", comment))?
    {
        None => return Ok(Err(Error::CommentNotFound(comment))),
        Some(meta) => meta,
    };
    let post_author = db
        .post_author(meta.post)
        .await
        .with_context(|| format!("fetching author of post {:?}", meta.post))?
        .ok_or_else(|| anyhow::anyhow!("comment {:?} has no post {:?}", comment, meta.post))?;
    if !AuthInfo::for_comment(Some(actor), meta.author, post_author).can_delete {
        return Ok(Err(Error::PermissionDenied));
    }
    delete_subtree(db, comment).await?;
    Ok(Ok(()))
}

async fn delete_subtree<D: Db + Send>(db: &mut D, root: CommentId) -> anyhow::Result<()> {
    // Parents always come before their replies in `subtree`
    let mut subtree = Vec::new();
    let mut to_visit = vec![root];
    while let Some(comment) = to_visit.pop() {
        let replies = db
            .list_replies(comment)
            .await
            .with_context(|| format!("listing replies to comment {:?}", comment))?;
        subtree.push(comment);
        to_visit.extend(replies);
    }
    for comment in subtree.into_iter().rev() {
        let existed = db
            .remove_comment(comment)
            .await
            .with_context(|| format!("removing comment {:?}", comment))?;
        if !existed {
            tracing::debug!(?comment, "comment disappeared during cascade deletion");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::{CommentMeta, PostId, Uuid};

    #[derive(Default)]
    struct MemDb {
        posts: HashMap<PostId, UserId>,
        // kept in insertion order to make listing deterministic
        comments: Vec<CommentMeta>,
        fail_removing: Option<CommentId>,
    }

    impl MemDb {
        fn post(&mut self, author: UserId) -> PostId {
            let id = PostId(Uuid::new_v4());
            self.posts.insert(id, author);
            id
        }

        fn comment(&mut self, post: PostId, author: UserId, parent: Option<CommentId>) -> CommentId {
            let id = CommentId(Uuid::new_v4());
            self.comments.push(CommentMeta {
                id,
                post,
                author,
                parent,
            });
            id
        }

        fn exists(&self, id: CommentId) -> bool {
            self.comments.iter().any(|c| c.id == id)
        }
    }

    #[async_trait]
    impl Db for MemDb {
        async fn post_author(&mut self, post: PostId) -> anyhow::Result<Option<UserId>> {
            Ok(self.posts.get(&post).copied())
        }

        async fn comment_meta(&mut self, comment: CommentId) -> anyhow::Result<Option<CommentMeta>> {
            Ok(self.comments.iter().find(|c| c.id == comment).copied())
        }

        async fn list_replies(&mut self, parent: CommentId) -> anyhow::Result<Vec<CommentId>> {
            Ok(self
                .comments
                .iter()
                .filter(|c| c.parent == Some(parent))
                .map(|c| c.id)
                .collect())
        }

        async fn remove_comment(&mut self, comment: CommentId) -> anyhow::Result<bool> {
            if self.fail_removing == Some(comment) {
                anyhow::bail!("store unavailable");
            }
            let len = self.comments.len();
            self.comments.retain(|c| c.id != comment);
            Ok(self.comments.len() != len)
        }
    }

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    #[tokio::test]
    async fn deleting_root_of_chain_removes_everything() {
        let mut db = MemDb::default();
        let u = user();
        let post = db.post(u);
        let a = db.comment(post, u, None);
        let b = db.comment(post, u, Some(a));
        let c = db.comment(post, u, Some(b));
        let _d = db.comment(post, u, Some(c));
        delete_comment_tree(&mut db, u, a).await.unwrap().unwrap();
        assert!(db.comments.is_empty());
    }

    #[tokio::test]
    async fn deletion_stays_in_its_subtree() {
        let mut db = MemDb::default();
        let u = user();
        let post = db.post(u);
        let a = db.comment(post, u, None);
        let b = db.comment(post, u, Some(a));
        let b1 = db.comment(post, u, Some(b));
        let c = db.comment(post, u, Some(a));
        let c1 = db.comment(post, u, Some(c));
        delete_comment_tree(&mut db, u, b).await.unwrap().unwrap();
        assert!(!db.exists(b) && !db.exists(b1));
        assert!(db.exists(a) && db.exists(c) && db.exists(c1));
    }

    #[tokio::test]
    async fn missing_comment_is_not_found_and_retry_is_safe() {
        let mut db = MemDb::default();
        let u = user();
        let post = db.post(u);
        let a = db.comment(post, u, None);
        delete_comment_tree(&mut db, u, a).await.unwrap().unwrap();
        assert_eq!(
            delete_comment_tree(&mut db, u, a).await.unwrap(),
            Err(Error::CommentNotFound(a))
        );
    }

    #[tokio::test]
    async fn strangers_are_forbidden_and_nothing_is_removed() {
        let mut db = MemDb::default();
        let (author, stranger) = (user(), user());
        let post = db.post(author);
        let a = db.comment(post, author, None);
        let _b = db.comment(post, author, Some(a));
        assert_eq!(
            delete_comment_tree(&mut db, stranger, a).await.unwrap(),
            Err(Error::PermissionDenied)
        );
        assert_eq!(db.comments.len(), 2);
    }

    #[tokio::test]
    async fn post_author_moderates_other_users_threads() {
        let mut db = MemDb::default();
        let (post_author, commenter, replier) = (user(), user(), user());
        let post = db.post(post_author);
        let a = db.comment(post, commenter, None);
        let _b = db.comment(post, replier, Some(a));
        let other = db.comment(post, commenter, None);
        delete_comment_tree(&mut db, post_author, a).await.unwrap().unwrap();
        assert_eq!(db.comments.len(), 1);
        assert!(db.exists(other));
    }

    #[tokio::test]
    async fn store_failure_is_surfaced_after_partial_deletion() {
        let mut db = MemDb::default();
        let u = user();
        let post = db.post(u);
        let a = db.comment(post, u, None);
        let b = db.comment(post, u, Some(a));
        let c = db.comment(post, u, Some(b));
        db.fail_removing = Some(b);
        assert!(delete_comment_tree(&mut db, u, a).await.is_err());
        assert!(!db.exists(c));
        assert!(db.exists(a) && db.exists(b));
    }

    /// Indexed store, for threads too large for `MemDb`'s linear scans
    #[derive(Default)]
    struct ChainDb {
        post: Option<(PostId, UserId)>,
        comments: HashMap<CommentId, CommentMeta>,
        replies: HashMap<CommentId, Vec<CommentId>>,
    }

    #[async_trait]
    impl Db for ChainDb {
        async fn post_author(&mut self, post: PostId) -> anyhow::Result<Option<UserId>> {
            Ok(self.post.filter(|(p, _)| *p == post).map(|(_, a)| a))
        }

        async fn comment_meta(&mut self, comment: CommentId) -> anyhow::Result<Option<CommentMeta>> {
            Ok(self.comments.get(&comment).copied())
        }

        async fn list_replies(&mut self, parent: CommentId) -> anyhow::Result<Vec<CommentId>> {
            Ok(self.replies.get(&parent).cloned().unwrap_or_default())
        }

        async fn remove_comment(&mut self, comment: CommentId) -> anyhow::Result<bool> {
            let Some(meta) = self.comments.remove(&comment) else {
                return Ok(false);
            };
            let replies = self.replies.get(&comment).map(|r| &r[..]).unwrap_or(&[]);
            assert!(
                replies.iter().all(|r| !self.comments.contains_key(r)),
                "comment removed before its replies"
            );
            if let Some(parent) = meta.parent {
                if let Some(siblings) = self.replies.get_mut(&parent) {
                    siblings.retain(|c| *c != comment);
                }
            }
            Ok(true)
        }
    }

    #[test]
    fn very_deep_chains_are_deleted_without_overflowing() {
        const DEPTH: usize = 100_000;
        // same stack size as a tokio worker thread
        std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let u = user();
                let post = PostId(Uuid::new_v4());
                let mut db = ChainDb {
                    post: Some((post, u)),
                    ..ChainDb::default()
                };
                let root = CommentId(Uuid::new_v4());
                let mut parent = None;
                let mut current = root;
                for _ in 0..DEPTH {
                    db.comments.insert(
                        current,
                        CommentMeta {
                            id: current,
                            post,
                            author: u,
                            parent,
                        },
                    );
                    if let Some(p) = parent {
                        db.replies.entry(p).or_default().push(current);
                    }
                    parent = Some(current);
                    current = CommentId(Uuid::new_v4());
                }
                tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap()
                    .block_on(delete_comment_tree(&mut db, u, root))
                    .unwrap()
                    .unwrap();
                assert!(db.comments.is_empty());
            })
            .unwrap()
            .join()
            .unwrap();
    }
}
