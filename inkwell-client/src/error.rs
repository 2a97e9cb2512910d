use crate::api::Error;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected answer from server: {0}")]
    Protocol(String),

    #[error("You need to log in first")]
    NotLoggedIn,
}

impl ClientError {
    pub fn api_error(&self) -> Option<&Error> {
        match self {
            ClientError::Api(e) => Some(e),
            _ => None,
        }
    }
}
