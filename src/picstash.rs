use std::{result, sync::Arc};

use log::{error, info, trace};
use serde::Deserialize;
use warp::http;

use crate::auth::SessionId;
use crate::session::SessionStore;
use crate::uploads::{StoreError, UploadStore};
use crate::users::{RegisterError, UserStore, VerifyError};

/// The application core: the three stores, shared behind an `Arc` and
/// injected into every handler.
pub struct PicStash {
    users: UserStore,
    sessions: SessionStore,
    uploads: UploadStore,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    BadCredentials,
    UsernameTaken,
    MalformedFilename,
    BadRequest,
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadCredentials | Error::UsernameTaken => http::StatusCode::FORBIDDEN,
            Error::MalformedFilename | Error::BadRequest => http::StatusCode::BAD_REQUEST,
        }
    }
}

impl Error {
    /// The only text a client ever sees. Bad-credential failures share one
    /// message so username-vs-password can't be told apart.
    pub fn message(self) -> &'static str {
        match self {
            Error::Internal => "Internal server error",
            Error::BadCredentials => "Username and/or password do not match.",
            Error::UsernameTaken => "username already taken",
            Error::MalformedFilename => "filename must have an extension",
            Error::BadRequest => "bad request",
        }
    }
}

impl warp::reject::Reject for Error {}

impl PicStash {
    pub fn new(users: UserStore, sessions: SessionStore, uploads: UploadStore) -> Self {
        Self {
            users,
            sessions,
            uploads,
        }
    }

    /// Resolve a session cookie to a username. The session must be live
    /// and its user must still exist, so deleting a user invalidates its
    /// sessions lazily, with no explicit cascade.
    pub async fn authenticate(&self, session: Option<SessionId>) -> Option<String> {
        let id = session?;
        let username = self.sessions.username_for(&id).await?;

        if self.users.contains(&username).await {
            trace!("session {id} resolved to {username}");
            Some(username)
        } else {
            None
        }
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<SessionId> {
        self.users
            .register(&form.username, &form.password, &form.firstname, &form.lastname)
            .await
            .map_err(|e| match e {
                RegisterError::AlreadyExists => {
                    info!("rejecting duplicate registration for {}", form.username);
                    Error::UsernameTaken
                }
                RegisterError::Internal => Error::Internal,
            })?;

        let id = self.new_session(&form.username).await?;
        info!("{} registered", form.username);
        Ok(id)
    }

    pub async fn login(&self, form: &LoginForm) -> Result<SessionId> {
        self.users
            .verify(&form.username, &form.password)
            .await
            .map_err(|e| match e {
                VerifyError::BadCredentials => {
                    error!("failed login for {}", form.username);
                    Error::BadCredentials
                }
                VerifyError::Internal => Error::Internal,
            })?;

        let id = self.new_session(&form.username).await?;
        info!("{} login: new session created", form.username);
        Ok(id)
    }

    async fn new_session(&self, username: &str) -> Result<SessionId> {
        self.sessions
            .create(username)
            .await
            .map_err(|()| Error::Internal)
    }

    /// Destroy the session (if any), then opportunistically kick off an
    /// expiry sweep in the background. The sweep never blocks the
    /// triggering request.
    pub async fn logout(self: &Arc<Self>, session: Option<SessionId>) {
        if let Some(ref id) = session {
            self.sessions.destroy(id).await;
            info!("session {id} logged out");
        }

        if self.sessions.sweep_due().await {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.sessions.sweep_expired().await;
            });
        }
    }

    pub async fn store_upload(&self, bytes: &[u8], original_filename: &str) -> Result<String> {
        self.uploads
            .store(bytes, original_filename)
            .await
            .map_err(|e| match e {
                StoreError::MalformedFilename => {
                    info!("rejecting upload with malformed name {original_filename:?}");
                    Error::MalformedFilename
                }
                StoreError::Internal => Error::Internal,
            })
    }

    pub async fn uploads(&self) -> Result<Vec<String>> {
        self.uploads.list().await.map_err(|()| Error::Internal)
    }
}
