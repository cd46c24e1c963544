pub mod activity;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod password;
pub mod providers;
pub mod tokens;
pub mod users;

pub use activity::{Activity, HasActivitySource, IpExtractor};
pub use auth::{AuthUser, Authenticator};
pub use config::AuthConfig;
pub use db::{Roles, SigninEvent, SigninOutcome, User};
pub use error::{AuthError, UserField, ValidationError};
pub use password::{Argon2Hasher, PasswordHasher};
pub use providers::{
    ExternalIdentity, IdTokenVerifier, Provider, ProviderConfig, ProviderRegistry, TokenVerifier,
};
pub use tokens::SessionTokens;
pub use users::{NewUser, UserChanges};
