use async_trait::async_trait;

use crate::{
    api::{
        AuthToken, Comment, CommentId, EditComment, Error, LikeStatus, NewComment, NewPost,
        NewSession, NewUser, Post, PostId, SessionInfo, User,
    },
    ClientError,
};

/// The server calls a comment thread needs
#[async_trait]
pub trait Api: Sync {
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ClientError>;

    async fn add_comment(
        &self,
        token: AuthToken,
        post: PostId,
        comment: &NewComment,
    ) -> Result<Comment, ClientError>;

    async fn edit_comment(
        &self,
        token: AuthToken,
        comment: CommentId,
        edit: &EditComment,
    ) -> Result<Comment, ClientError>;

    async fn delete_comment(&self, token: AuthToken, comment: CommentId) -> Result<(), ClientError>;
}

/// Client for the JSON API exposed by inkwell-server
#[derive(Clone, Debug)]
pub struct HttpApi {
    host: String,
    client: reqwest::Client,
}

async fn parse_response<R>(resp: reqwest::Response) -> Result<R, ClientError>
where
    R: for<'de> serde::Deserialize<'de>,
{
    if resp.status().is_success() {
        return Ok(resp.json().await?);
    }
    Err(error_from(resp).await)
}

async fn check_response(resp: reqwest::Response) -> Result<(), ClientError> {
    // successful answers without a body are empty, which is not valid json
    match resp.status().is_success() {
        true => Ok(()),
        false => Err(error_from(resp).await),
    }
}

async fn error_from(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(e) => return ClientError::Network(e),
    };
    match Error::parse(&body) {
        Ok(err) => ClientError::Api(err),
        Err(err) => ClientError::Protocol(format!(
            "status {status} with unparseable error body: {err:#}"
        )),
    }
}

impl HttpApi {
    pub fn new(host: String) -> HttpApi {
        HttpApi {
            host: host.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.host, path)
    }

    pub async fn register(&self, user: &NewUser) -> Result<SessionInfo, ClientError> {
        parse_response(self.client.post(self.url("users")).json(user).send().await?).await
    }

    pub async fn login(&self, session: &NewSession) -> Result<SessionInfo, ClientError> {
        parse_response(
            self.client
                .post(self.url("users/login"))
                .json(session)
                .send()
                .await?,
        )
        .await
    }

    pub async fn logout(&self, token: AuthToken) -> Result<(), ClientError> {
        check_response(
            self.client
                .post(self.url("users/logout"))
                .bearer_auth(token.0)
                .send()
                .await?,
        )
        .await
    }

    pub async fn whoami(&self, token: AuthToken) -> Result<User, ClientError> {
        parse_response(
            self.client
                .get(self.url("whoami"))
                .bearer_auth(token.0)
                .send()
                .await?,
        )
        .await
    }

    pub async fn list_posts(&self) -> Result<Vec<Post>, ClientError> {
        parse_response(self.client.get(self.url("posts")).send().await?).await
    }

    pub async fn fetch_post(&self, post: PostId) -> Result<Post, ClientError> {
        parse_response(
            self.client
                .get(self.url(&format!("posts/{}", post.0)))
                .send()
                .await?,
        )
        .await
    }

    pub async fn create_post(&self, token: AuthToken, post: &NewPost) -> Result<Post, ClientError> {
        parse_response(
            self.client
                .post(self.url("posts"))
                .bearer_auth(token.0)
                .json(post)
                .send()
                .await?,
        )
        .await
    }

    pub async fn edit_post(
        &self,
        token: AuthToken,
        id: PostId,
        post: &NewPost,
    ) -> Result<Post, ClientError> {
        parse_response(
            self.client
                .put(self.url(&format!("posts/{}", id.0)))
                .bearer_auth(token.0)
                .json(post)
                .send()
                .await?,
        )
        .await
    }

    pub async fn delete_post(&self, token: AuthToken, id: PostId) -> Result<(), ClientError> {
        check_response(
            self.client
                .delete(self.url(&format!("posts/{}", id.0)))
                .bearer_auth(token.0)
                .send()
                .await?,
        )
        .await
    }

    pub async fn toggle_like(&self, token: AuthToken, id: PostId) -> Result<LikeStatus, ClientError> {
        parse_response(
            self.client
                .post(self.url(&format!("posts/{}/like", id.0)))
                .bearer_auth(token.0)
                .send()
                .await?,
        )
        .await
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn fetch_comments(&self, post: PostId) -> Result<Vec<Comment>, ClientError> {
        parse_response(
            self.client
                .get(self.url(&format!("posts/{}/comments", post.0)))
                .send()
                .await?,
        )
        .await
    }

    async fn add_comment(
        &self,
        token: AuthToken,
        post: PostId,
        comment: &NewComment,
    ) -> Result<Comment, ClientError> {
        parse_response(
            self.client
                .post(self.url(&format!("posts/{}/comments", post.0)))
                .bearer_auth(token.0)
                .json(comment)
                .send()
                .await?,
        )
        .await
    }

    async fn edit_comment(
        &self,
        token: AuthToken,
        comment: CommentId,
        edit: &EditComment,
    ) -> Result<Comment, ClientError> {
        parse_response(
            self.client
                .put(self.url(&format!("comments/{}", comment.0)))
                .bearer_auth(token.0)
                .json(edit)
                .send()
                .await?,
        )
        .await
    }

    async fn delete_comment(&self, token: AuthToken, comment: CommentId) -> Result<(), ClientError> {
        check_response(
            self.client
                .delete(self.url(&format!("comments/{}", comment.0)))
                .bearer_auth(token.0)
                .send()
                .await?,
        )
        .await
    }
}
