use std::ops::BitOr;

use crate::UserId;

/// What an actor may do on a given comment (or post)
///
/// The server recomputes this for every mutation; clients only use it to decide
/// which controls to display.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthInfo {
    pub can_reply: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

impl AuthInfo {
    pub fn all() -> AuthInfo {
        Self::all_or_nothing(true)
    }

    pub fn none() -> AuthInfo {
        Self::all_or_nothing(false)
    }

    pub fn all_or_nothing(all: bool) -> AuthInfo {
        AuthInfo {
            can_reply: all,
            can_edit: all,
            can_delete: all,
        }
    }

    /// Permissions of `actor` (`None` if not logged in) on a comment
    ///
    /// Only the commenter may edit. The commenter and the post's author may
    /// delete, the latter to moderate their own post. Anyone logged in may reply.
    pub fn for_comment(
        actor: Option<UserId>,
        comment_author: UserId,
        post_author: UserId,
    ) -> AuthInfo {
        let actor = match actor {
            None => return AuthInfo::none(),
            Some(a) => a,
        };
        let as_commenter = AuthInfo::all_or_nothing(actor == comment_author);
        let as_moderator = AuthInfo {
            can_reply: true,
            can_edit: false,
            can_delete: actor == post_author,
        };
        as_commenter | as_moderator
    }

    /// Permissions of `actor` on a post: `can_reply` is whether they can comment
    pub fn for_post(actor: Option<UserId>, post_author: UserId) -> AuthInfo {
        match actor {
            None => AuthInfo::none(),
            Some(a) => AuthInfo {
                can_reply: true,
                can_edit: a == post_author,
                can_delete: a == post_author,
            },
        }
    }
}

impl BitOr for AuthInfo {
    type Output = Self;

    fn bitor(self, rhs: AuthInfo) -> AuthInfo {
        AuthInfo {
            can_reply: self.can_reply || rhs.can_reply,
            can_edit: self.can_edit || rhs.can_edit,
            can_delete: self.can_delete || rhs.can_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Uuid;

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    #[test]
    fn commenter_can_do_everything() {
        let (commenter, post_author) = (user(), user());
        assert_eq!(
            AuthInfo::for_comment(Some(commenter), commenter, post_author),
            AuthInfo::all()
        );
    }

    #[test]
    fn post_author_can_delete_but_not_edit() {
        let (commenter, post_author) = (user(), user());
        let auth = AuthInfo::for_comment(Some(post_author), commenter, post_author);
        assert!(auth.can_delete);
        assert!(auth.can_reply);
        assert!(!auth.can_edit);
    }

    #[test]
    fn strangers_can_only_reply() {
        let auth = AuthInfo::for_comment(Some(user()), user(), user());
        assert_eq!(
            auth,
            AuthInfo {
                can_reply: true,
                can_edit: false,
                can_delete: false,
            }
        );
    }

    #[test]
    fn anonymous_can_do_nothing() {
        let author = user();
        assert_eq!(AuthInfo::for_comment(None, author, author), AuthInfo::none());
        assert_eq!(AuthInfo::for_post(None, author), AuthInfo::none());
    }

    #[test]
    fn only_post_author_manages_post() {
        let author = user();
        assert_eq!(AuthInfo::for_post(Some(author), author), AuthInfo::all());
        let other = AuthInfo::for_post(Some(user()), author);
        assert!(other.can_reply && !other.can_edit && !other.can_delete);
    }
}
