use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::{CommentId, PostId};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The persistence layer failed; details are only in the server logs
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Post not found {0:?}")]
    PostNotFound(PostId),

    #[error("Comment not found {0:?}")]
    CommentNotFound(CommentId),

    #[error("Required field is empty {0:?}")]
    EmptyField(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Parent comment {0:?} belongs to another post")]
    ParentNotInPost(CommentId),

    #[error("Email already used {0}")]
    EmailAlreadyUsed(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::PostNotFound(_) => StatusCode::NOT_FOUND,
            Error::CommentNotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyField(_) => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::ParentNotInPost(_) => StatusCode::BAD_REQUEST,
            Error::EmailAlreadyUsed(_) => StatusCode::CONFLICT,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Store(msg) => json!({
                "message": msg,
                "type": "store",
            }),
            Error::Unauthorized => json!({
                "message": "not authenticated",
                "type": "unauthorized",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::PostNotFound(p) => json!({
                "message": "post not found",
                "type": "post-not-found",
                "id": p.0,
            }),
            Error::CommentNotFound(c) => json!({
                "message": "comment not found",
                "type": "comment-not-found",
                "id": c.0,
            }),
            Error::EmptyField(f) => json!({
                "message": "a required field was left empty",
                "type": "empty-field",
                "field": f,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::ParentNotInPost(c) => json!({
                "message": "the parent comment belongs to another post",
                "type": "parent-not-in-post",
                "id": c.0,
            }),
            Error::EmailAlreadyUsed(e) => json!({
                "message": "email already used",
                "type": "conflict-email",
                "email": e,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {name:?}"))
        };
        let id_field = || {
            data.get("id")
                .and_then(|id| id.as_str())
                .and_then(|id| Uuid::from_str(id).ok())
                .ok_or_else(|| anyhow!("error contents has no proper uuid"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "store" => Error::Store(str_field("message").unwrap_or_default()),
                "unauthorized" => Error::Unauthorized,
                "permission-denied" => Error::PermissionDenied,
                "post-not-found" => Error::PostNotFound(PostId(id_field()?)),
                "comment-not-found" => Error::CommentNotFound(CommentId(id_field()?)),
                "empty-field" => Error::EmptyField(str_field("field")?),
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "parent-not-in-post" => Error::ParentNotInPost(CommentId(id_field()?)),
                "conflict-email" => Error::EmailAlreadyUsed(str_field("email")?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_with_payload_survive_the_wire() {
        let id = CommentId(Uuid::new_v4());
        for err in [
            Error::CommentNotFound(id),
            Error::ParentNotInPost(id),
            Error::EmptyField(String::from("text")),
            Error::EmailAlreadyUsed(String::from("a@example.org")),
        ] {
            assert_eq!(Error::parse(&err.contents()).unwrap(), err);
        }
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(Error::Unauthorized.status_code(), 401);
        assert_eq!(Error::PermissionDenied.status_code(), 403);
        assert_eq!(Error::PostNotFound(PostId::stub()).status_code(), 404);
        assert_eq!(Error::EmptyField(String::new()).status_code(), 400);
        assert_eq!(Error::Store(String::new()).status_code(), 500);
    }

    #[test]
    fn unknown_error_types_do_not_parse() {
        assert!(Error::parse(br#"{"type": "teapot"}"#).is_err());
        assert!(Error::parse(b"not json").is_err());
    }
}
