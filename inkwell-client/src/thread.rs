use crate::{
    api::{AuthToken, CommentId, EditComment, NewComment, PostId, UserId},
    build_forest, render, Api, ClientError, CommentNode, CommentView, Session,
};

/// The comments of one post, as last fetched, along with what went wrong since
///
/// Every mutation is a single write followed by a full refetch: the forest is
/// never patched locally. When anything fails, the previous forest is kept and
/// the error is stored as a notification for the user interface to show.
#[derive(Debug)]
pub struct CommentThread {
    post: PostId,
    post_author: UserId,
    forest: Vec<CommentNode>,
    notification: Option<ClientError>,
}

impl CommentThread {
    /// An empty thread, to be filled by `refresh`
    pub fn new(post: PostId, post_author: UserId) -> CommentThread {
        CommentThread {
            post,
            post_author,
            forest: Vec::new(),
            notification: None,
        }
    }

    pub fn forest(&self) -> &[CommentNode] {
        &self.forest
    }

    pub fn notification(&self) -> Option<&ClientError> {
        self.notification.as_ref()
    }

    pub fn dismiss_notification(&mut self) -> Option<ClientError> {
        self.notification.take()
    }

    pub fn view(&self, session: &Session) -> Vec<CommentView> {
        render(&self.forest, session.user_id(), self.post_author)
    }

    fn notify(&mut self, err: ClientError) {
        tracing::warn!(post = ?self.post, ?err, "comment thread operation failed");
        self.notification = Some(err);
    }

    /// Refetches all comments of the post and rebuilds the forest
    pub async fn refresh<A: Api>(&mut self, api: &A) -> Result<(), ClientError> {
        tracing::debug!(post = ?self.post, "refetching comments");
        match api.fetch_comments(self.post).await {
            Ok(comments) => {
                self.forest = build_forest(comments);
                Ok(())
            }
            Err(err) => {
                // Keep the stale forest around, but let the caller know
                let res = Err(copy_error(&err));
                self.notify(err);
                res
            }
        }
    }

    fn token(&mut self, session: &Session) -> Result<AuthToken, ClientError> {
        match session.current() {
            Some(login) => Ok(login.token),
            None => {
                self.notify(ClientError::NotLoggedIn);
                Err(ClientError::NotLoggedIn)
            }
        }
    }

    async fn after_write<A: Api, T>(
        &mut self,
        api: &A,
        res: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        match res {
            Ok(res) => {
                // The write went through: a failed refetch only leaves the
                // forest stale, and `refresh` already raised the notification
                if let Err(err) = self.refresh(api).await {
                    tracing::debug!(post = ?self.post, ?err, "keeping stale forest after write");
                }
                Ok(res)
            }
            Err(err) => {
                let res = Err(copy_error(&err));
                self.notify(err);
                res
            }
        }
    }

    /// Posts a new comment, top-level if `parent` is `None`
    pub async fn add_comment<A: Api>(
        &mut self,
        api: &A,
        session: &Session,
        parent: Option<CommentId>,
        text: String,
    ) -> Result<CommentId, ClientError> {
        let token = self.token(session)?;
        let new = NewComment {
            text,
            parent_id: parent,
        };
        let res = api.add_comment(token, self.post, &new).await.map(|c| c.id);
        self.after_write(api, res).await
    }

    pub async fn edit_comment<A: Api>(
        &mut self,
        api: &A,
        session: &Session,
        comment: CommentId,
        text: String,
    ) -> Result<(), ClientError> {
        let token = self.token(session)?;
        let res = api
            .edit_comment(token, comment, &EditComment { text })
            .await
            .map(|_| ());
        self.after_write(api, res).await
    }

    /// Deletes the comment along with all its replies
    pub async fn delete_comment<A: Api>(
        &mut self,
        api: &A,
        session: &Session,
        comment: CommentId,
    ) -> Result<(), ClientError> {
        let token = self.token(session)?;
        let res = api.delete_comment(token, comment).await;
        self.after_write(api, res).await
    }
}

// reqwest errors cannot be cloned, so the copy returned to the caller loses their details
fn copy_error(err: &ClientError) -> ClientError {
    match err {
        ClientError::Api(e) => ClientError::Api(e.clone()),
        ClientError::Network(e) => ClientError::Protocol(format!("network error: {e}")),
        ClientError::Protocol(msg) => ClientError::Protocol(msg.clone()),
        ClientError::NotLoggedIn => ClientError::NotLoggedIn,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use inkwell_mock_server::MockServer;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        api::{Comment, Error, NewPost, NewUser},
        LoginInfo, Walk,
    };

    struct MockApi {
        server: Mutex<MockServer>,
        fail_fetches: Mutex<bool>,
    }

    #[async_trait]
    impl Api for MockApi {
        async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ClientError> {
            if *self.fail_fetches.lock().await {
                return Err(ClientError::Protocol(String::from("connection reset")));
            }
            Ok(self.server.lock().await.fetch_comments(post)?)
        }

        async fn add_comment(
            &self,
            token: AuthToken,
            post: PostId,
            comment: &NewComment,
        ) -> Result<Comment, ClientError> {
            Ok(self
                .server
                .lock()
                .await
                .add_comment(token, post, comment.clone())?)
        }

        async fn edit_comment(
            &self,
            token: AuthToken,
            comment: CommentId,
            edit: &EditComment,
        ) -> Result<Comment, ClientError> {
            Ok(self
                .server
                .lock()
                .await
                .edit_comment(token, comment, edit.clone())?)
        }

        async fn delete_comment(
            &self,
            token: AuthToken,
            comment: CommentId,
        ) -> Result<(), ClientError> {
            Ok(self.server.lock().await.delete_comment(token, comment).await?)
        }
    }

    fn login(server: &mut MockServer, name: &str) -> Session {
        let info = server
            .register(NewUser {
                name: String::from(name),
                email: format!("{name}@example.org"),
                password: String::from("pass"),
            })
            .unwrap();
        let session = Session::new();
        session.login(LoginInfo {
            host: String::from("mock"),
            user: info.user,
            token: info.token,
        });
        session
    }

    async fn setup() -> (MockApi, Session, Session, CommentThread) {
        let mut server = MockServer::new();
        let (ann, bob) = (login(&mut server, "ann"), login(&mut server, "bob"));
        let ann_login = ann.current().unwrap();
        let post = server
            .create_post(
                ann_login.token,
                NewPost {
                    title: String::from("hello"),
                    content: String::from("world"),
                },
            )
            .unwrap();
        let api = MockApi {
            server: Mutex::new(server),
            fail_fetches: Mutex::new(false),
        };
        let mut thread = CommentThread::new(post.id, ann_login.user.id);
        thread.refresh(&api).await.unwrap();
        (api, ann, bob, thread)
    }

    fn shape(thread: &CommentThread) -> Vec<(usize, String)> {
        Walk::new(thread.forest())
            .map(|(d, n)| (d, n.comment.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn mutations_refetch_the_tree() {
        let (api, ann, bob, mut thread) = setup().await;
        assert!(thread.forest().is_empty());

        let a = thread
            .add_comment(&api, &bob, None, String::from("a"))
            .await
            .unwrap();
        let b = thread
            .add_comment(&api, &ann, Some(a), String::from("b"))
            .await
            .unwrap();
        thread
            .add_comment(&api, &bob, Some(b), String::from("c"))
            .await
            .unwrap();
        thread
            .edit_comment(&api, &bob, a, String::from("a2"))
            .await
            .unwrap();
        assert_eq!(
            shape(&thread),
            vec![
                (0, String::from("a2")),
                (1, String::from("b")),
                (2, String::from("c"))
            ]
        );

        // ann wrote the post, so she may remove bob's thread
        let views = thread.view(&ann);
        assert!(views[0].controls.can_delete && !views[0].controls.can_edit);
        thread.delete_comment(&api, &ann, a).await.unwrap();
        assert!(thread.forest().is_empty());
        assert!(thread.notification().is_none());
    }

    #[tokio::test]
    async fn failures_keep_the_stale_tree_and_notify() {
        let (api, ann, bob, mut thread) = setup().await;
        let a = thread
            .add_comment(&api, &ann, None, String::from("mine"))
            .await
            .unwrap();

        let err = thread
            .edit_comment(&api, &bob, a, String::from("hijacked"))
            .await
            .unwrap_err();
        assert_eq!(err.api_error(), Some(&Error::PermissionDenied));
        assert_eq!(shape(&thread), vec![(0, String::from("mine"))]);
        assert_eq!(
            thread.dismiss_notification().and_then(|n| n.api_error().cloned()),
            Some(Error::PermissionDenied)
        );

        // the write goes through, but the refetch fails: the old tree stays
        *api.fail_fetches.lock().await = true;
        let reply = thread
            .add_comment(&api, &bob, Some(a), String::from("reply"))
            .await
            .unwrap();
        assert_eq!(shape(&thread), vec![(0, String::from("mine"))]);
        assert!(matches!(
            thread.notification(),
            Some(ClientError::Protocol(_))
        ));

        *api.fail_fetches.lock().await = false;
        thread.refresh(&api).await.unwrap();
        assert_eq!(
            shape(&thread),
            vec![(0, String::from("mine")), (1, String::from("reply"))]
        );
        assert_eq!(thread.forest()[0].replies[0].comment.id, reply);
    }

    #[tokio::test]
    async fn logged_out_users_cannot_comment() {
        let (api, _, _, mut thread) = setup().await;
        let res = thread
            .add_comment(&api, &Session::new(), None, String::from("anonymous"))
            .await;
        assert!(matches!(res, Err(ClientError::NotLoggedIn)));
        assert!(matches!(
            thread.notification(),
            Some(ClientError::NotLoggedIn)
        ));
        assert!(thread.forest().is_empty());
    }
}
