use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use inkwell_api::{
    delete_comment_tree, AuthInfo, AuthToken, Comment, CommentId, CommentMeta, Db, EditComment,
    Error, LikeStatus, NewComment, NewPost, NewSession, NewUser, Post, PostId, SessionInfo, Time,
    User, UserId, Uuid,
};

/// In-memory rendition of inkwell-server, answering the same way for the same calls
#[derive(Debug, Default)]
pub struct MockServer {
    users: Vec<DbUser>,
    posts: Vec<DbPost>,
    likes: HashSet<(UserId, PostId)>,
    // oldest first, which is also the order they are served in
    comments: Vec<Comment>,
}

#[derive(Debug)]
struct DbUser {
    user: User,
    email: String,
    // tests (of which mock-server is a part of) don't actually use bcrypt
    pass: String,
    sessions: HashMap<AuthToken, Device>,
}

#[derive(Debug)]
struct Device(String);

#[derive(Debug)]
struct DbPost {
    id: PostId,
    author: UserId,
    title: String,
    content: String,
    created_at: Time,
    updated_at: Time,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Return email & password for user number `id`
    pub fn test_get_user_info(&self, id: usize) -> (&str, &str) {
        let u = self
            .users
            .get(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()));
        (&u.email, &u.pass)
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    fn resolve(&self, tok: AuthToken) -> Result<&DbUser, Error> {
        self.users
            .iter()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::Unauthorized)
    }

    fn open_session(&mut self, idx: usize, device: String) -> SessionInfo {
        let token = AuthToken(Uuid::new_v4());
        let u = &mut self.users[idx];
        u.sessions.insert(token, Device(device));
        SessionInfo {
            user: u.user.clone(),
            email: u.email.clone(),
            token,
        }
    }

    pub fn register(&mut self, u: NewUser) -> Result<SessionInfo, Error> {
        u.validate()?;
        if self.users.iter().any(|db| db.email == u.email) {
            return Err(Error::EmailAlreadyUsed(u.email));
        }
        self.users.push(DbUser {
            user: User {
                id: UserId(Uuid::new_v4()),
                name: u.name,
            },
            email: u.email,
            pass: u.password,
            sessions: HashMap::new(),
        });
        Ok(self.open_session(self.users.len() - 1, String::from("registration")))
    }

    pub fn login(&mut self, s: NewSession) -> Result<SessionInfo, Error> {
        s.validate()?;
        let idx = self
            .users
            .iter()
            .position(|u| u.email == s.email && u.pass == s.password)
            .ok_or(Error::Unauthorized)?;
        Ok(self.open_session(idx, s.device))
    }

    pub fn logout(&mut self, tok: AuthToken) -> Result<(), Error> {
        for u in self.users.iter_mut() {
            if let Some(Device(device)) = u.sessions.remove(&tok) {
                tracing::debug!(user = ?u.user.id, ?device, "closed session");
                return Ok(());
            }
        }
        Err(Error::Unauthorized)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<User, Error> {
        Ok(self.resolve(tok)?.user.clone())
    }

    fn user(&self, id: UserId) -> User {
        self.users
            .iter()
            .find(|u| u.user.id == id)
            .map(|u| u.user.clone())
            .unwrap_or_else(|| panic!("post author {id:?} vanished from mock server"))
    }

    fn render_post(&self, p: &DbPost) -> Post {
        Post {
            id: p.id,
            author: self.user(p.author),
            title: p.title.clone(),
            content: p.content.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            likes: self.likes.iter().filter(|(_, post)| *post == p.id).count() as i64,
        }
    }

    fn post_idx(&self, id: PostId) -> Result<usize, Error> {
        self.posts
            .iter()
            .position(|p| p.id == id)
            .ok_or(Error::PostNotFound(id))
    }

    /// All posts, newest first
    pub fn list_posts(&self) -> Vec<Post> {
        self.posts.iter().rev().map(|p| self.render_post(p)).collect()
    }

    pub fn fetch_post(&self, id: PostId) -> Result<Post, Error> {
        Ok(self.render_post(&self.posts[self.post_idx(id)?]))
    }

    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let author = self.resolve(tok)?.user.id;
        p.validate()?;
        let now = Utc::now();
        self.posts.push(DbPost {
            id: PostId(Uuid::new_v4()),
            author,
            title: p.title,
            content: p.content,
            created_at: now,
            updated_at: now,
        });
        Ok(self.render_post(&self.posts[self.posts.len() - 1]))
    }

    pub fn edit_post(&mut self, tok: AuthToken, id: PostId, p: NewPost) -> Result<Post, Error> {
        let actor = self.resolve(tok)?.user.id;
        p.validate()?;
        let idx = self.post_idx(id)?;
        if !AuthInfo::for_post(Some(actor), self.posts[idx].author).can_edit {
            return Err(Error::PermissionDenied);
        }
        let post = &mut self.posts[idx];
        post.title = p.title;
        post.content = p.content;
        post.updated_at = Utc::now();
        Ok(self.render_post(&self.posts[idx]))
    }

    pub fn delete_post(&mut self, tok: AuthToken, id: PostId) -> Result<(), Error> {
        let actor = self.resolve(tok)?.user.id;
        let idx = self.post_idx(id)?;
        if !AuthInfo::for_post(Some(actor), self.posts[idx].author).can_delete {
            return Err(Error::PermissionDenied);
        }
        self.posts.remove(idx);
        self.comments.retain(|c| c.post_id != id);
        self.likes.retain(|(_, p)| *p != id);
        Ok(())
    }

    pub fn toggle_like(&mut self, tok: AuthToken, id: PostId) -> Result<LikeStatus, Error> {
        let actor = self.resolve(tok)?.user.id;
        self.post_idx(id)?;
        let liked = match self.likes.remove(&(actor, id)) {
            true => false,
            false => self.likes.insert((actor, id)),
        };
        let likes = self.likes.iter().filter(|(_, p)| *p == id).count() as i64;
        Ok(LikeStatus { liked, likes })
    }

    pub fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, Error> {
        self.post_idx(post)?;
        Ok(self
            .comments
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }

    pub fn add_comment(
        &mut self,
        tok: AuthToken,
        post: PostId,
        c: NewComment,
    ) -> Result<Comment, Error> {
        let author = self.resolve(tok)?.user.clone();
        c.validate()?;
        self.post_idx(post)?;
        if let Some(parent) = c.parent_id {
            let p = self
                .comments
                .iter()
                .find(|p| p.id == parent)
                .ok_or(Error::CommentNotFound(parent))?;
            if p.post_id != post {
                return Err(Error::ParentNotInPost(parent));
            }
        }
        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            text: c.text,
            post_id: post,
            author,
            parent_id: c.parent_id,
            created_at: Utc::now(),
        };
        self.comments.push(comment.clone());
        Ok(comment)
    }

    pub fn edit_comment(
        &mut self,
        tok: AuthToken,
        id: CommentId,
        e: EditComment,
    ) -> Result<Comment, Error> {
        let actor = self.resolve(tok)?.user.id;
        e.validate()?;
        let idx = self
            .comments
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::CommentNotFound(id))?;
        let post_author = self.posts[self.post_idx(self.comments[idx].post_id)?].author;
        if !AuthInfo::for_comment(Some(actor), self.comments[idx].author.id, post_author).can_edit
        {
            return Err(Error::PermissionDenied);
        }
        self.comments[idx].text = e.text;
        Ok(self.comments[idx].clone())
    }

    pub async fn delete_comment(&mut self, tok: AuthToken, id: CommentId) -> Result<(), Error> {
        let actor = self.resolve(tok)?.user.id;
        match delete_comment_tree(self, actor, id).await {
            Ok(res) => res,
            Err(e) => Err(Error::Store(format!("{e:#}"))),
        }
    }
}

#[async_trait]
impl Db for MockServer {
    async fn post_author(&mut self, post: PostId) -> anyhow::Result<Option<UserId>> {
        Ok(self.posts.iter().find(|p| p.id == post).map(|p| p.author))
    }

    async fn comment_meta(&mut self, comment: CommentId) -> anyhow::Result<Option<CommentMeta>> {
        Ok(self
            .comments
            .iter()
            .find(|c| c.id == comment)
            .map(|c| CommentMeta {
                id: c.id,
                post: c.post_id,
                author: c.author.id,
                parent: c.parent_id,
            }))
    }

    async fn list_replies(&mut self, parent: CommentId) -> anyhow::Result<Vec<CommentId>> {
        Ok(self
            .comments
            .iter()
            .filter(|c| c.parent_id == Some(parent))
            .map(|c| c.id)
            .collect())
    }

    async fn remove_comment(&mut self, comment: CommentId) -> anyhow::Result<bool> {
        let before = self.comments.len();
        self.comments.retain(|c| c.id != comment);
        Ok(self.comments.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(mock: &mut MockServer, name: &str) -> SessionInfo {
        mock.register(NewUser {
            name: String::from(name),
            email: format!("{name}@example.org"),
            password: String::from("hunter2"),
        })
        .unwrap()
    }

    fn post(mock: &mut MockServer, tok: AuthToken) -> PostId {
        mock.create_post(
            tok,
            NewPost {
                title: String::from("title"),
                content: String::from("<p>content</p>"),
            },
        )
        .unwrap()
        .id
    }

    fn comment(
        mock: &mut MockServer,
        tok: AuthToken,
        post: PostId,
        parent: Option<CommentId>,
    ) -> CommentId {
        mock.add_comment(
            tok,
            post,
            NewComment {
                text: String::from("text"),
                parent_id: parent,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn emails_are_unique_and_login_checks_password() {
        let mut mock = MockServer::new();
        let ann = register(&mut mock, "ann");
        assert_eq!(
            mock.register(NewUser {
                name: String::from("other ann"),
                email: ann.email.clone(),
                password: String::from("pass"),
            }),
            Err(Error::EmailAlreadyUsed(ann.email.clone()))
        );
        let wrong = NewSession {
            email: ann.email.clone(),
            password: String::from("wrong"),
            device: String::new(),
        };
        assert_eq!(mock.login(wrong), Err(Error::Unauthorized));
        let (email, pass) = mock.test_get_user_info(0);
        let session = NewSession {
            email: String::from(email),
            password: String::from(pass),
            device: String::from("laptop"),
        };
        let info = mock.login(session).unwrap();
        assert_eq!(mock.whoami(info.token), Ok(ann.user));
        mock.logout(info.token).unwrap();
        assert_eq!(mock.whoami(info.token), Err(Error::Unauthorized));
    }

    #[test]
    fn replies_must_stay_in_their_post() {
        let mut mock = MockServer::new();
        let ann = register(&mut mock, "ann");
        let (p1, p2) = (post(&mut mock, ann.token), post(&mut mock, ann.token));
        let c = comment(&mut mock, ann.token, p1, None);
        let reply = NewComment {
            text: String::from("reply"),
            parent_id: Some(c),
        };
        assert_eq!(
            mock.add_comment(ann.token, p2, reply.clone()),
            Err(Error::ParentNotInPost(c))
        );
        let missing = CommentId(Uuid::new_v4());
        let dangling = NewComment {
            text: String::from("reply"),
            parent_id: Some(missing),
        };
        assert_eq!(
            mock.add_comment(ann.token, p1, dangling),
            Err(Error::CommentNotFound(missing))
        );
        assert!(mock.add_comment(ann.token, p1, reply).is_ok());
    }

    #[test]
    fn only_the_commenter_edits() {
        let mut mock = MockServer::new();
        let (ann, bob) = (register(&mut mock, "ann"), register(&mut mock, "bob"));
        let p = post(&mut mock, ann.token);
        let c = comment(&mut mock, bob.token, p, None);
        let edit = EditComment {
            text: String::from("edited"),
        };
        assert_eq!(
            mock.edit_comment(ann.token, c, edit.clone()),
            Err(Error::PermissionDenied)
        );
        assert_eq!(mock.edit_comment(bob.token, c, edit).unwrap().text, "edited");
    }

    #[tokio::test]
    async fn post_author_deletes_whole_threads() {
        let mut mock = MockServer::new();
        let (ann, bob, carol) = (
            register(&mut mock, "ann"),
            register(&mut mock, "bob"),
            register(&mut mock, "carol"),
        );
        let p = post(&mut mock, ann.token);
        let a = comment(&mut mock, bob.token, p, None);
        let b = comment(&mut mock, carol.token, p, Some(a));
        comment(&mut mock, bob.token, p, Some(b));
        let kept = comment(&mut mock, carol.token, p, None);

        assert_eq!(
            mock.delete_comment(carol.token, a).await,
            Err(Error::PermissionDenied)
        );
        mock.delete_comment(ann.token, a).await.unwrap();
        let left = mock.fetch_comments(p).unwrap();
        assert_eq!(left.iter().map(|c| c.id).collect::<Vec<_>>(), vec![kept]);
        assert_eq!(
            mock.delete_comment(ann.token, a).await,
            Err(Error::CommentNotFound(a))
        );
    }

    #[test]
    fn deleting_a_post_drops_its_comments_and_likes() {
        let mut mock = MockServer::new();
        let (ann, bob) = (register(&mut mock, "ann"), register(&mut mock, "bob"));
        let p = post(&mut mock, ann.token);
        comment(&mut mock, bob.token, p, None);
        assert_eq!(
            mock.toggle_like(bob.token, p),
            Ok(LikeStatus {
                liked: true,
                likes: 1
            })
        );
        assert_eq!(mock.delete_post(bob.token, p), Err(Error::PermissionDenied));
        mock.delete_post(ann.token, p).unwrap();
        assert_eq!(mock.fetch_comments(p), Err(Error::PostNotFound(p)));
        assert!(mock.list_posts().is_empty());
        assert!(mock.comments.is_empty());
        assert!(mock.likes.is_empty());
    }
}
