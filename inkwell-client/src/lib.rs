mod error;
pub use error::ClientError;

mod remote;
pub use remote::{Api, HttpApi};

mod render;
pub use render::{render, render_text, CommentView};

mod session;
pub use session::{LoginInfo, Session};

mod thread;
pub use thread::CommentThread;

mod tree;
pub use tree::{build_forest, find_in, CommentNode, Walk};

pub mod api {
    pub use inkwell_api::*;
}
