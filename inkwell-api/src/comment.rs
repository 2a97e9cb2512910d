use uuid::Uuid;

use crate::{Error, PostId, Time, User};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

/// A comment as stored, flat: nesting is only ever derived client-side from `parent_id`
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub post_id: PostId,
    #[serde(rename = "authorId")]
    pub author: User,

    /// `None` for top-level comments
    pub parent_id: Option<CommentId>,
    pub created_at: Time,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_required("text", &self.text)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub text: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_required("text", &self.text)
    }
}
