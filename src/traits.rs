use std::future::Future;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use url::Url;

use crate::error::Error;
use crate::routing::Navigation;
use crate::types::{
    AuthEvent, AuthResponse, AuthorizationRequest, OAuthProvider, Session, SignOutScope, User,
    UserAttributes, UserId,
};

/// The identity service.
///
/// "No session" is `Ok(None)`, never an error; errors are transport or
/// service failures.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionGateway for MyBackend {
///     async fn get_session(&self) -> Result<Option<Session>, Error> {
///         self.client.current_session().await.map_err(into_error)
///     }
///     // ...
/// }
/// ```
pub trait SessionGateway: Send + Sync + 'static {
    /// Current session, verified with the service where the backend can.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    /// Exchange the refresh token for a new session.
    fn refresh_session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
        email_redirect_to: Option<&Url>,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, Error>> + Send;

    fn sign_out(&self, scope: SignOutScope) -> impl Future<Output = Result<(), Error>> + Send;

    fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&Url>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn update_user(
        &self,
        attributes: &UserAttributes,
    ) -> impl Future<Output = Result<User, Error>> + Send;

    /// Prepare a redirect-based sign-in. The session arrives later as an event.
    fn sign_in_with_oauth(
        &self,
        provider: &OAuthProvider,
        redirect_to: Option<&Url>,
    ) -> impl Future<Output = Result<AuthorizationRequest, Error>> + Send;

    /// Change notifications. Each call returns an independent receiver.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// A row as returned by the data store.
pub type Row = Map<String, Value>;

/// Per-user collections consulted for onboarding progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Profiles,
    MusicPreferences,
}

impl Collection {
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::MusicPreferences => "music_preferences",
        }
    }

    /// Column holding the owning user's id.
    #[must_use]
    pub fn owner_column(self) -> &'static str {
        match self {
            Self::Profiles => "id",
            Self::MusicPreferences => "user_id",
        }
    }
}

/// Remote structured-data store.
pub trait DataStore: Send + Sync + 'static {
    /// Fetch the row owned by `user_id`. A missing row is `Ok(None)`.
    fn fetch_row(
        &self,
        collection: Collection,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<Row>, Error>> + Send;
}

/// Host routing surface (browser history or equivalent).
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, navigation: &Navigation);

    /// Leave the app for an external page (social sign-in).
    fn open_external(&self, url: &Url);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sends notices to the log. Used when the host provides no notifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => {
                tracing::warn!(title = %notice.title, message = %notice.message, "Auth notice");
            }
            NoticeLevel::Success | NoticeLevel::Info => {
                tracing::info!(title = %notice.title, message = %notice.message, "Auth notice");
            }
        }
    }
}
