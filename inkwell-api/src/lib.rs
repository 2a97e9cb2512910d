use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

mod auth;
pub use auth::{AuthToken, NewSession, NewUser, SessionInfo};

mod cascade;
pub use cascade::delete_comment_tree;

mod comment;
pub use comment::{Comment, CommentId, EditComment, NewComment};

mod db;
pub use db::{CommentMeta, Db};

mod error;
pub use error::Error;

mod perms;
pub use perms::AuthInfo;

mod post;
pub use post::{LikeStatus, NewPost, Post, PostId};

mod user;
pub use user::{User, UserId};

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

// All the strings that make it into the database must go through this: postgres
// rejects NUL bytes, so they must be rejected before reaching it.
pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Like `validate_string`, but also rejects strings that are empty once trimmed
pub fn validate_required(field: &str, s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyField(String::from(field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_fields_reject_blank_text() {
        assert_eq!(
            validate_required("text", "  \n\t"),
            Err(Error::EmptyField(String::from("text")))
        );
        assert_eq!(validate_required("text", " hi "), Ok(()));
    }

    #[test]
    fn null_bytes_are_rejected_before_emptiness() {
        assert_eq!(
            validate_required("title", "\0"),
            Err(Error::NullByteInString(String::from("\0")))
        );
    }
}
