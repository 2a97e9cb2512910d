use std::collections::HashMap;

use crate::api::{Comment, CommentId};

/// A comment with its direct replies, oldest first
#[derive(Debug)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

// The default drop glue recurses once per nesting level, which a long enough
// reply chain would turn into a stack overflow.
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

impl CommentNode {
    /// Number of comments in this subtree, self included
    pub fn len(&self) -> usize {
        Walk::new(std::slice::from_ref(self)).count()
    }
}

/// Pre-order traversal of a forest, yielding each node along with its depth
pub struct Walk<'a> {
    stack: Vec<(usize, &'a CommentNode)>,
}

impl<'a> Walk<'a> {
    pub fn new(forest: &'a [CommentNode]) -> Walk<'a> {
        Walk {
            stack: forest.iter().rev().map(|n| (0, n)).collect(),
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a CommentNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.replies.iter().rev().map(|r| (depth + 1, r)));
        Some((depth, node))
    }
}

pub fn find_in<'a>(forest: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    Walk::new(forest)
        .map(|(_, n)| n)
        .find(|n| n.comment.id == *id)
}

/// Nests the flat comment list of a post into a forest of replies
///
/// `comments` is expected oldest-first, as served by the server, but every level
/// is stably re-sorted by creation date anyway. Every comment ends up exactly once
/// in the result: those whose parent is unknown become top-level comments.
pub fn build_forest(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let mut index = HashMap::with_capacity(n);
    for (i, c) in comments.iter().enumerate() {
        index.entry(c.id).or_insert(i);
    }

    let mut parents = comments
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let parent_id = c.parent_id?;
            match index.get(&parent_id) {
                Some(&p) if p != i => Some(p),
                Some(_) => {
                    tracing::warn!(comment = ?c.id, "comment answers itself, showing it top-level");
                    None
                }
                None => {
                    tracing::debug!(comment = ?c.id, parent = ?parent_id, "parent not found, showing comment top-level");
                    None
                }
            }
        })
        .collect::<Vec<_>>();
    break_cycles(&comments, &mut parents);

    let mut roots = Vec::new();
    let mut children = vec![Vec::new(); n];
    for (i, p) in parents.iter().enumerate() {
        match p {
            None => roots.push(i),
            Some(p) => children[*p].push(i),
        }
    }
    // sort_by is stable, so equal dates keep the input order
    let by_date = |a: &usize, b: &usize| comments[*a].created_at.cmp(&comments[*b].created_at);
    roots.sort_by(by_date);
    for c in children.iter_mut() {
        c.sort_by(by_date);
    }

    // Assemble bottom-up: in reverse pre-order, all replies of a node are built before it
    let mut preorder = Vec::with_capacity(n);
    let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();
    while let Some(i) = stack.pop() {
        preorder.push(i);
        stack.extend(children[i].iter().rev());
    }
    let mut comments = comments.into_iter().map(Some).collect::<Vec<_>>();
    let mut built = (0..n).map(|_| None).collect::<Vec<Option<CommentNode>>>();
    for &i in preorder.iter().rev() {
        let replies = children[i]
            .iter()
            .map(|&c| built[c].take().expect("reply built before its parent"))
            .collect();
        built[i] = Some(CommentNode {
            comment: comments[i].take().expect("comment built twice"),
            replies,
        });
    }
    roots
        .iter()
        .map(|&r| built[r].take().expect("top-level comment was not built"))
        .collect()
}

/// Cuts parent cycles, that the server never produces but corrupted data could
///
/// Without this, comments in a cycle would be reachable from no top-level
/// comment and silently vanish. Each cycle is cut at its earliest record.
fn break_cycles(comments: &[Comment], parents: &mut [Option<usize>]) {
    #[derive(Clone, Copy, PartialEq)]
    enum Seen {
        No,
        OnPath,
        Done,
    }
    let mut seen = vec![Seen::No; parents.len()];
    let mut path: Vec<usize> = Vec::new();
    for start in 0..parents.len() {
        let mut cur = start;
        loop {
            match seen[cur] {
                Seen::Done => break,
                Seen::OnPath => {
                    let cycle_start = path
                        .iter()
                        .position(|&p| p == cur)
                        .expect("node on path is not in path");
                    let earliest = *path[cycle_start..]
                        .iter()
                        .min()
                        .expect("cycle cannot be empty");
                    tracing::warn!(comment = ?comments[earliest].id, "reply cycle, showing comment top-level");
                    parents[earliest] = None;
                    break;
                }
                Seen::No => {
                    seen[cur] = Seen::OnPath;
                    path.push(cur);
                    match parents[cur] {
                        None => break,
                        Some(p) => cur = p,
                    }
                }
            }
        }
        for p in path.drain(..) {
            seen[p] = Seen::Done;
        }
    }
}
