use anyhow::Context;
use inkwell_client::{
    api::{
        AuthToken, CommentId, EditComment, NewPost, NewSession, NewUser, Post, PostId, Uuid,
    },
    render_text, Api, CommentThread, HttpApi, LoginInfo, Session,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, default_value = "http://127.0.0.1:3000")]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user, and print a session token for them
    Register {
        name: String,
        email: String,
        password: String,
    },

    /// Open a session, and print its token
    Login {
        email: String,
        password: String,

        /// Name of the session, to recognize it later
        #[structopt(long, default_value = "inkwell-ctl")]
        device: String,
    },

    /// Close the session of INKWELL_TOKEN
    Logout,

    /// List all posts, newest first
    Posts,

    /// Show a post with its comments
    Post { id: Uuid },

    /// Publish a new post
    NewPost { title: String, content: String },

    /// Replace the title and content of one of your posts
    EditPost {
        id: Uuid,
        title: String,
        content: String,
    },

    /// Delete one of your posts, along with its comments and likes
    DeletePost { id: Uuid },

    /// Show the comment thread of a post
    Comments { post: Uuid },

    /// Comment on a post
    Comment {
        post: Uuid,
        text: String,

        /// Comment to answer, if any
        #[structopt(long)]
        reply_to: Option<Uuid>,
    },

    /// Replace the text of one of your comments
    EditComment { id: Uuid, text: String },

    /// Delete a comment along with all its replies
    DeleteComment { id: Uuid },

    /// Like a post, or unlike it if already liked
    Like { post: Uuid },
}

fn token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("INKWELL_TOKEN").context("retrieving INKWELL_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing INKWELL_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

/// Logs in with INKWELL_TOKEN if it is set, stays anonymous otherwise
async fn session(api: &HttpApi) -> anyhow::Result<Session> {
    let session = Session::new();
    if std::env::var_os("INKWELL_TOKEN").is_some() {
        let token = token()?;
        let user = api.whoami(token).await.context("recovering session")?;
        session.login(LoginInfo {
            host: String::from(api.host()),
            user,
            token,
        });
    }
    Ok(session)
}

fn print_post(p: &Post) {
    println!("{} [{}]", p.title, p.id.0);
    println!(
        "by {} on {}, {} like(s)",
        p.author.name,
        p.created_at.format("%Y-%m-%d %H:%M"),
        p.likes
    );
}

async fn show_thread(api: &HttpApi, session: &Session, post: &Post) -> anyhow::Result<()> {
    let mut thread = CommentThread::new(post.id, post.author.id);
    thread.refresh(api).await.context("fetching comments")?;
    print!("{}", render_text(&thread.view(session)));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let api = HttpApi::new(opt.host);

    match opt.cmd {
        Command::Register {
            name,
            email,
            password,
        } => {
            let info = api
                .register(&NewUser {
                    name,
                    email,
                    password,
                })
                .await
                .context("registering")?;
            println!("export INKWELL_TOKEN={}", info.token.0);
        }
        Command::Login {
            email,
            password,
            device,
        } => {
            let info = api
                .login(&NewSession {
                    email,
                    password,
                    device,
                })
                .await
                .context("logging in")?;
            println!("export INKWELL_TOKEN={}", info.token.0);
        }
        Command::Logout => {
            api.logout(token()?).await.context("logging out")?;
        }
        Command::Posts => {
            for p in api.list_posts().await.context("listing posts")? {
                print_post(&p);
                println!();
            }
        }
        Command::Post { id } => {
            let session = session(&api).await?;
            let post = api.fetch_post(PostId(id)).await.context("fetching post")?;
            print_post(&post);
            println!();
            println!("{}", post.content);
            println!();
            show_thread(&api, &session, &post).await?;
        }
        Command::NewPost { title, content } => {
            let post = api
                .create_post(token()?, &NewPost { title, content })
                .await
                .context("creating post")?;
            print_post(&post);
        }
        Command::EditPost { id, title, content } => {
            let post = api
                .edit_post(token()?, PostId(id), &NewPost { title, content })
                .await
                .context("editing post")?;
            print_post(&post);
        }
        Command::DeletePost { id } => {
            api.delete_post(token()?, PostId(id))
                .await
                .context("deleting post")?;
        }
        Command::Comments { post } => {
            let session = session(&api).await?;
            let post = api.fetch_post(PostId(post)).await.context("fetching post")?;
            show_thread(&api, &session, &post).await?;
        }
        Command::Comment {
            post,
            text,
            reply_to,
        } => {
            let session = session(&api).await?;
            let post = api.fetch_post(PostId(post)).await.context("fetching post")?;
            let mut thread = CommentThread::new(post.id, post.author.id);
            thread
                .add_comment(&api, &session, reply_to.map(CommentId), text)
                .await
                .context("commenting")?;
            if let Some(err) = thread.notification() {
                eprintln!("comment posted, but the thread could not be reloaded: {err}");
            }
            print!("{}", render_text(&thread.view(&session)));
        }
        Command::EditComment { id, text } => {
            api.edit_comment(token()?, CommentId(id), &EditComment { text })
                .await
                .context("editing comment")?;
        }
        Command::DeleteComment { id } => {
            api.delete_comment(token()?, CommentId(id))
                .await
                .context("deleting comment")?;
        }
        Command::Like { post } => {
            let status = api
                .toggle_like(token()?, PostId(post))
                .await
                .context("toggling like")?;
            match status.liked {
                true => println!("liked, {} like(s)", status.likes),
                false => println!("unliked, {} like(s)", status.likes),
            }
        }
    }

    Ok(())
}
