use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{AuthToken, User, UserId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoginInfo {
    pub host: String,
    pub user: User,
    pub token: AuthToken,
}

/// The currently logged-in user, shared by everything that needs it
///
/// Only `login` and `logout` change it; clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct Session(Arc<RwLock<Option<LoginInfo>>>);

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn login(&self, info: LoginInfo) {
        tracing::debug!(user = ?info.user.id, "logged in");
        *self.0.write() = Some(info);
    }

    pub fn logout(&self) -> Option<LoginInfo> {
        self.0.write().take()
    }

    pub fn current(&self) -> Option<LoginInfo> {
        self.0.read().clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.0.read().as_ref().map(|l| l.user.id)
    }
}
