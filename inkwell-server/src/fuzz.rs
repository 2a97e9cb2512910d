#![cfg(test)]

use axum::{
    extract::FromRequestParts,
    http::{self, request},
};
use bolero::generator::TypeGenerator;
use inkwell_api::{
    AuthToken, Comment, CommentId, EditComment, Error as ApiError, LikeStatus, NewComment,
    NewPost, NewSession, NewUser, Post, PostId, SessionInfo, User, UserId, Uuid,
};
use inkwell_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

/// Picks the most recent postgresql found in path, if any
fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    Some(postgresfixture::cluster::Cluster::new(data, runtime?))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let Some(cluster) = build_pg_cluster(datadir_path) else {
                eprintln!("postgresql seems to not be installed in path, skipping {}", stringify!($name));
                return;
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                // create test db
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::Unauthorized)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Register {
        name: String,
        // few distinct emails, so that conflicts actually happen
        email: u8,
        password: String,
    },
    Login {
        uid: usize,
        device: String,
        wrong_password: bool,
    },
    Logout {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    ListPosts,
    FetchPost {
        pid: usize,
    },
    CreatePost {
        sid: usize,
        title: String,
        content: String,
    },
    EditPost {
        sid: usize,
        pid: usize,
        title: String,
        content: String,
    },
    DeletePost {
        sid: usize,
        pid: usize,
    },
    ToggleLike {
        sid: usize,
        pid: usize,
    },
    FetchComments {
        pid: usize,
    },
    AddComment {
        sid: usize,
        pid: usize,
        parent: Option<usize>,
        text: String,
    },
    EditComment {
        sid: usize,
        cid: usize,
        text: String,
    },
    DeleteComment {
        sid: usize,
        cid: usize,
    },
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<AuthToken>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {}", token.0)),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

/// A post as seen from the mock server's ids, without timestamps
#[derive(Debug, PartialEq)]
struct PostView {
    id: PostId,
    author: User,
    title: String,
    content: String,
    likes: i64,
}

#[derive(Debug, PartialEq)]
struct CommentView {
    id: CommentId,
    post: PostId,
    author: User,
    text: String,
    parent: Option<CommentId>,
}

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

/// Pairs of ids that designate the same object on the app and on the mock
struct IdMap<T>(Vec<(T, T)>);

impl<T: Copy + PartialEq> IdMap<T> {
    fn push(&mut self, app: T, mock: T) {
        self.0.push((app, mock));
    }

    /// Unknown ids are the stub ones, sent to both sides alike
    fn to_mock(&self, app: T) -> T {
        self.0
            .iter()
            .find(|(a, _)| *a == app)
            .map(|(_, m)| *m)
            .unwrap_or(app)
    }

    fn pick(&self, fuzz_id: usize, stub: T) -> (T, T) {
        match resize_int(fuzz_id, ..self.0.len()) {
            Some(i) => self.0[i],
            None => (stub, stub),
        }
    }
}

struct ComparativeFuzzer {
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
    users: IdMap<UserId>,
    posts: IdMap<PostId>,
    comments: IdMap<CommentId>,
}

impl ComparativeFuzzer {
    fn new(pool: PgPool) -> ComparativeFuzzer {
        ComparativeFuzzer {
            // lowest cost bcrypt accepts, to keep the test fast
            app: app(pool, 4),
            mock: MockServer::new(),
            sessions: Vec::new(),
            users: IdMap(Vec::new()),
            posts: IdMap(Vec::new()),
            comments: IdMap(Vec::new()),
        }
    }

    fn tokens(&self, sid: usize) -> (AuthToken, AuthToken) {
        match resize_int(sid, ..self.sessions.len()) {
            Some(i) => (self.sessions[i].app, self.sessions[i].mock),
            None => (AuthToken::stub(), AuthToken::stub()),
        }
    }

    fn user(&self, u: User) -> User {
        User {
            id: self.users.to_mock(u.id),
            name: u.name,
        }
    }

    fn err(&self, e: ApiError) -> ApiError {
        match e {
            ApiError::PostNotFound(p) => ApiError::PostNotFound(self.posts.to_mock(p)),
            ApiError::CommentNotFound(c) => ApiError::CommentNotFound(self.comments.to_mock(c)),
            ApiError::ParentNotInPost(c) => ApiError::ParentNotInPost(self.comments.to_mock(c)),
            e => e,
        }
    }

    fn post(&self, p: Post) -> PostView {
        PostView {
            id: self.posts.to_mock(p.id),
            author: self.user(p.author),
            title: p.title,
            content: p.content,
            likes: p.likes,
        }
    }

    fn comment(&self, c: Comment) -> CommentView {
        CommentView {
            id: self.comments.to_mock(c.id),
            post: self.posts.to_mock(c.post_id),
            author: self.user(c.author),
            text: c.text,
            parent: c.parent_id.map(|p| self.comments.to_mock(p)),
        }
    }

    /// Brings an app answer into the mock's id space
    fn from_app<T, U>(
        &self,
        res: Result<T, ApiError>,
        f: impl FnOnce(&Self, T) -> U,
    ) -> Result<U, ApiError> {
        match res {
            Ok(v) => Ok(f(self, v)),
            Err(e) => Err(self.err(e)),
        }
    }

    fn record_session(
        &mut self,
        app: &Result<SessionInfo, ApiError>,
        mock: &Result<SessionInfo, ApiError>,
    ) {
        if let (Ok(app), Ok(mock)) = (app, mock) {
            self.sessions.push(Session {
                app: app.token,
                mock: mock.token,
            });
        }
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::Register {
                name,
                email,
                password,
            } => {
                let new_user = NewUser {
                    name,
                    email: format!("user{}@example.org", email % 8),
                    password,
                };
                let app_res: Result<SessionInfo, _> =
                    run_on_app(&mut self.app, "POST", "/api/users", None, &new_user).await;
                let mock_res = self.mock.register(new_user);
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.users.push(app.user.id, mock.user.id);
                }
                self.record_session(&app_res, &mock_res);
                compare(
                    "Register",
                    self.from_app(app_res, |s, i| (s.user(i.user), i.email)),
                    mock_res.map(|i| (i.user, i.email)),
                );
            }
            FuzzOp::Login {
                uid,
                device,
                wrong_password,
            } => {
                let (email, password) = match resize_int(uid, ..self.mock.test_num_users()) {
                    Some(uid) => {
                        let (email, password) = self.mock.test_get_user_info(uid);
                        (String::from(email), String::from(password))
                    }
                    None => (
                        String::from("nobody@example.org"),
                        String::from("password"),
                    ),
                };
                let session = NewSession {
                    email,
                    password: match wrong_password {
                        // prefixed, as bcrypt ignores whatever comes after its 72nd byte
                        true => format!("x{password}"),
                        false => password,
                    },
                    device,
                };
                let app_res: Result<SessionInfo, _> =
                    run_on_app(&mut self.app, "POST", "/api/users/login", None, &session).await;
                let mock_res = self.mock.login(session);
                self.record_session(&app_res, &mock_res);
                compare(
                    "Login",
                    self.from_app(app_res, |s, i| (s.user(i.user), i.email)),
                    mock_res.map(|i| (i.user, i.email)),
                );
            }
            FuzzOp::Logout { sid } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let app_res: Result<(), _> = run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/users/logout",
                    Some(app_tok),
                    &(),
                )
                .await;
                compare("Logout", app_res, self.mock.logout(mock_tok));
            }
            FuzzOp::Whoami { sid } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let app_res: Result<User, _> =
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(app_tok), &()).await;
                compare(
                    "Whoami",
                    self.from_app(app_res, |s, u| s.user(u)),
                    self.mock.whoami(mock_tok),
                );
            }
            FuzzOp::ListPosts => {
                let app_res: Result<Vec<Post>, _> =
                    run_on_app(&mut self.app, "GET", "/api/posts", None, &()).await;
                compare(
                    "ListPosts",
                    self.from_app(app_res, |s, ps| ps.into_iter().map(|p| s.post(p)).collect()),
                    Ok(self.mock.list_posts().into_iter().map(|p| self.post(p)).collect::<Vec<_>>()),
                );
            }
            FuzzOp::FetchPost { pid } => {
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let app_res: Result<Post, _> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts/{}", app_id.0),
                    None,
                    &(),
                )
                .await;
                compare(
                    "FetchPost",
                    self.from_app(app_res, |s, p| s.post(p)),
                    self.mock.fetch_post(mock_id).map(|p| self.post(p)),
                );
            }
            FuzzOp::CreatePost {
                sid,
                title,
                content,
            } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let post = NewPost { title, content };
                let app_res: Result<Post, _> =
                    run_on_app(&mut self.app, "POST", "/api/posts", Some(app_tok), &post).await;
                let mock_res = self.mock.create_post(mock_tok, post);
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.posts.push(app.id, mock.id);
                }
                compare(
                    "CreatePost",
                    self.from_app(app_res, |s, p| s.post(p)),
                    mock_res.map(|p| self.post(p)),
                );
            }
            FuzzOp::EditPost {
                sid,
                pid,
                title,
                content,
            } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let post = NewPost { title, content };
                let app_res: Result<Post, _> = run_on_app(
                    &mut self.app,
                    "PUT",
                    &format!("/api/posts/{}", app_id.0),
                    Some(app_tok),
                    &post,
                )
                .await;
                compare(
                    "EditPost",
                    self.from_app(app_res, |s, p| s.post(p)),
                    self.mock
                        .edit_post(mock_tok, mock_id, post)
                        .map(|p| self.post(p)),
                );
            }
            FuzzOp::DeletePost { sid, pid } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let app_res: Result<(), _> = run_on_app(
                    &mut self.app,
                    "DELETE",
                    &format!("/api/posts/{}", app_id.0),
                    Some(app_tok),
                    &(),
                )
                .await;
                compare(
                    "DeletePost",
                    self.from_app(app_res, |_, ()| ()),
                    self.mock.delete_post(mock_tok, mock_id),
                );
            }
            FuzzOp::ToggleLike { sid, pid } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let app_res: Result<LikeStatus, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &format!("/api/posts/{}/like", app_id.0),
                    Some(app_tok),
                    &(),
                )
                .await;
                compare(
                    "ToggleLike",
                    self.from_app(app_res, |_, l| l),
                    self.mock.toggle_like(mock_tok, mock_id),
                );
            }
            FuzzOp::FetchComments { pid } => {
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let app_res: Result<Vec<Comment>, _> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts/{}/comments", app_id.0),
                    None,
                    &(),
                )
                .await;
                compare(
                    "FetchComments",
                    self.from_app(app_res, |s, cs| cs.into_iter().map(|c| s.comment(c)).collect()),
                    self.mock
                        .fetch_comments(mock_id)
                        .map(|cs| cs.into_iter().map(|c| self.comment(c)).collect::<Vec<_>>()),
                );
            }
            FuzzOp::AddComment {
                sid,
                pid,
                parent,
                text,
            } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.posts.pick(pid, PostId::stub());
                let (app_parent, mock_parent) = match parent {
                    None => (None, None),
                    Some(cid) => {
                        let (a, m) = self.comments.pick(cid, CommentId(Uuid::nil()));
                        (Some(a), Some(m))
                    }
                };
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    &format!("/api/posts/{}/comments", app_id.0),
                    Some(app_tok),
                    &NewComment {
                        text: text.clone(),
                        parent_id: app_parent,
                    },
                )
                .await;
                let mock_res = self.mock.add_comment(
                    mock_tok,
                    mock_id,
                    NewComment {
                        text,
                        parent_id: mock_parent,
                    },
                );
                if let (Ok(app), Ok(mock)) = (&app_res, &mock_res) {
                    self.comments.push(app.id, mock.id);
                }
                compare(
                    "AddComment",
                    self.from_app(app_res, |s, c| s.comment(c)),
                    mock_res.map(|c| self.comment(c)),
                );
            }
            FuzzOp::EditComment { sid, cid, text } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.comments.pick(cid, CommentId(Uuid::nil()));
                let edit = EditComment { text };
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "PUT",
                    &format!("/api/comments/{}", app_id.0),
                    Some(app_tok),
                    &edit,
                )
                .await;
                compare(
                    "EditComment",
                    self.from_app(app_res, |s, c| s.comment(c)),
                    self.mock
                        .edit_comment(mock_tok, mock_id, edit)
                        .map(|c| self.comment(c)),
                );
            }
            FuzzOp::DeleteComment { sid, cid } => {
                let (app_tok, mock_tok) = self.tokens(sid);
                let (app_id, mock_id) = self.comments.pick(cid, CommentId(Uuid::nil()));
                let app_res: Result<(), _> = run_on_app(
                    &mut self.app,
                    "DELETE",
                    &format!("/api/comments/{}", app_id.0),
                    Some(app_tok),
                    &(),
                )
                .await;
                let mock_res = self.mock.delete_comment(mock_tok, mock_id).await;
                compare("DeleteComment", self.from_app(app_res, |_, ()| ()), mock_res);
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool);
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);
