use std::fmt::Write;

use crate::{
    api::{AuthInfo, CommentId, Time, UserId},
    CommentNode, Walk,
};

/// What to display for one comment of a thread
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentView {
    pub id: CommentId,

    /// Nesting level, 0 for top-level comments
    pub depth: usize,

    pub author: String,
    pub date: Time,
    pub text: String,

    /// Which of the reply / edit / delete controls to show
    pub controls: AuthInfo,
}

/// Lays out a comment forest for display, each comment directly followed by its replies
///
/// `actor` is the logged-in user if any, `post_author` the author of the post the
/// comments are on.
pub fn render(forest: &[CommentNode], actor: Option<UserId>, post_author: UserId) -> Vec<CommentView> {
    Walk::new(forest)
        .map(|(depth, node)| {
            let c = &node.comment;
            CommentView {
                id: c.id,
                depth,
                author: c.author.name.clone(),
                date: c.created_at,
                text: c.text.clone(),
                controls: AuthInfo::for_comment(actor, c.author.id, post_author),
            }
        })
        .collect()
}

pub fn render_text(views: &[CommentView]) -> String {
    let mut res = String::new();
    for v in views {
        let indent = "    ".repeat(v.depth);
        let mut controls = Vec::new();
        if v.controls.can_reply {
            controls.push("reply");
        }
        if v.controls.can_edit {
            controls.push("edit");
        }
        if v.controls.can_delete {
            controls.push("delete");
        }
        // writing to a String cannot fail
        let _ = write!(
            res,
            "{indent}{} on {} [{}]",
            v.author,
            v.date.format("%Y-%m-%d %H:%M"),
            v.id.0
        );
        if !controls.is_empty() {
            let _ = write!(res, " ({})", controls.join(", "));
        }
        res.push('\n');
        for line in v.text.lines() {
            let _ = writeln!(res, "{indent}| {line}");
        }
    }
    res
}
