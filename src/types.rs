use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

/// Stable identifier of an account at the identity service.
///
/// Opaque to this crate: only compared for equality and used as a cache key.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Bearer credential issued with a session.
///
/// Compared only for equality. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Identity record attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "user_metadata")]
    pub metadata: Map<String, Value>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Credential bundle issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Session {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

impl Session {
    #[must_use]
    pub fn new(access_token: AccessToken, expires_at: OffsetDateTime, user: User) -> Self {
        Self {
            access_token,
            refresh_token: None,
            expires_at,
            user,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Whether the session expires before `now + margin`.
    #[must_use]
    pub fn expires_within(&self, margin: time::Duration) -> bool {
        self.expires_at <= OffsetDateTime::now_utc() + margin
    }

    /// Same credential for the same account.
    #[must_use]
    pub fn same_as(&self, other: &Session) -> bool {
        self.access_token == other.access_token && self.user.id == other.user.id
    }
}

/// What happened at the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Change notification delivered by [`SessionGateway::subscribe`](crate::SessionGateway::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    #[must_use]
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }
}

/// Gateway answer to sign-up and sign-in.
///
/// Sign-up with e-mail confirmation enabled yields a user without a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

/// Outcome of a primary auth operation, shaped for inline error rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResult {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub error: Option<String>,
}

impl AuthResult {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<AuthResponse> for AuthResult {
    fn from(response: AuthResponse) -> Self {
        Self {
            user: response.user,
            session: response.session,
            error: None,
        }
    }
}

/// Account fields to change through the identity service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl UserAttributes {
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Self::default()
        }
    }
}

/// Which sessions a sign-out revokes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum SignOutScope {
    #[default]
    #[display("global")]
    Global,
    #[display("local")]
    Local,
    #[display("others")]
    Others,
}

/// External identity provider name (`google`, `spotify`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into)]
pub struct OAuthProvider(pub String);

impl OAuthProvider {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OAuthProvider {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Where to send the browser to start a social sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub provider: OAuthProvider,
    pub url: Url,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn new(provider: OAuthProvider, url: Url) -> Self {
        Self { provider, url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str, user: &str) -> Session {
        Session::new(
            AccessToken::new(token),
            OffsetDateTime::from_unix_timestamp(1_900_000_000).unwrap(),
            User::new(user),
        )
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("secret-value");
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
        assert!(!format!("{:?}", session("secret-value", "u1")).contains("secret-value"));
    }

    #[test]
    fn session_serializes_expiry_as_unix_seconds() {
        let json = serde_json::to_value(session("t", "u1")).unwrap();
        assert_eq!(json["expires_at"], 1_900_000_000);
        assert_eq!(json["access_token"], "t");
        assert_eq!(json["user"]["id"], "u1");
    }

    #[test]
    fn user_accepts_service_metadata_field() {
        let user: User = serde_json::from_str(
            r#"{"id":"u1","email":"a@b.c","user_metadata":{"name":"Ana"}}"#,
        )
        .unwrap();
        assert_eq!(user.id, UserId::from("u1"));
        assert_eq!(user.metadata["name"], "Ana");
    }

    #[test]
    fn same_as_compares_token_and_user() {
        let a = session("t1", "u1");
        assert!(a.same_as(&session("t1", "u1")));
        assert!(!a.same_as(&session("t2", "u1")));
        assert!(!a.same_as(&session("t1", "u2")));
    }

    #[test]
    fn expires_within_margin() {
        let soon = Session::new(
            AccessToken::new("t"),
            OffsetDateTime::now_utc() + time::Duration::seconds(10),
            User::new("u1"),
        );
        assert!(soon.expires_within(time::Duration::seconds(60)));
        assert!(!soon.expires_within(time::Duration::ZERO));
    }

    #[test]
    fn sign_out_scope_display() {
        assert_eq!(SignOutScope::Global.to_string(), "global");
        assert_eq!(SignOutScope::Others.to_string(), "others");
    }
}
