pub mod auth;
pub mod cookie;
pub mod oauth;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod server;
pub mod wire;

pub use auth::{AuthError, SessionAuthenticator};
pub use cookie::{CredentialCodec, SESSION_COOKIE};
pub use oauth::{AuthenticatedUser, HttpOauthExchange, OauthConfig, OauthExchange};
pub use registry::{Connection, ConnectionHandle, ConnectionRegistry, RegistryError};
pub use server::{app_state, build_router, serve, AppState, BackendFactory, ServerConfig, ServerHandle};
