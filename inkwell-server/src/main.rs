use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use structopt::StructOpt;
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use error::Error;
use extractors::*;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, StructOpt)]
#[structopt(name = "inkwell-server", about = "Serve the inkwell blogging API")]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// bcrypt cost used to hash new passwords
    #[structopt(long, default_value = "12")]
    bcrypt_cost: u32,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(db_url)
            .await
            .with_context(|| format!("Error opening database {:?}", db_url))?,
    ))
}

pub fn app(db: PgPool, bcrypt_cost: u32) -> Router {
    let state = AppState {
        db,
        bcrypt_cost: BcryptCost(bcrypt_cost),
    };
    Router::new()
        .route("/api/users", post(handlers::register))
        .route("/api/users/login", post(handlers::login))
        .route("/api/users/logout", post(handlers::logout))
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/:id",
            get(handlers::fetch_post)
                .put(handlers::edit_post)
                .delete(handlers::delete_post),
        )
        .route("/api/posts/:id/like", post(handlers::toggle_like))
        .route(
            "/api/posts/:id/comments",
            get(handlers::fetch_comments).post(handlers::add_comment),
        )
        .route(
            "/api/comments/:id",
            put(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = create_sqlx_pool(&db_url).await?;
    MIGRATOR
        .run(&mut *db.acquire().await.context("getting migrator connection")?)
        .await
        .context("applying migrations")?;

    let app = app(db, opt.bcrypt_cost);

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
