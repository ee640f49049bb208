#![doc = include_str!("../README.md")]

pub mod completeness;
pub mod config;
pub mod controller;
mod deadline;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod pkce;
pub mod routing;
pub mod storage;
pub mod traits;
pub mod types;

#[cfg(test)]
mod fakes;

// Re-exports for convenient access
pub use completeness::{
    CompletenessEvaluator, is_core_profile_complete, is_music_preferences_complete,
};
pub use config::AuthConfig;
pub use controller::{AuthState, ControllerBuilder, SessionController};
pub use error::Error;
#[cfg(feature = "http")]
pub use http::{GatewayConfig, HttpGateway, RestDataStore};
#[cfg(feature = "http")]
pub use pkce::PkcePair;
pub use routing::{
    Navigation, NavigationMode, RouteDecision, RouteInputs, RoutePaths, RoutePolicy,
};
pub use storage::{
    CompletenessCache, CompletenessStatus, FileStorage, KeyValueStorage, MemoryStorage,
    PersistedSession, SessionCache, UnavailableStorage,
};
pub use traits::{
    Collection, DataStore, Navigator, Notice, NoticeLevel, Notifier, Row, SessionGateway,
    TracingNotifier,
};
pub use types::{
    AccessToken, AuthEvent, AuthEventKind, AuthResponse, AuthResult, AuthorizationRequest,
    OAuthProvider, Session, SignOutScope, User, UserAttributes, UserId,
};
