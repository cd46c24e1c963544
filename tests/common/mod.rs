#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gatehouse::activity::unix_now;
use gatehouse::db::Database;
use gatehouse::{
    Activity, Argon2Hasher, AuthConfig, AuthUser, Authenticator, IdTokenVerifier, NewUser,
    Provider, ProviderConfig, ProviderRegistry, User,
};
use jsonwebtoken::{EncodingKey, Header};

pub const PROVIDER_SECRET: &[u8] = b"integration-provider-secret";
pub const GOOGLE_CLIENT_ID: &str = "gatehouse-google-client";
pub const DEVICE: &str = "Firefox on Linux";
pub const OTHER_DEVICE: &str = "Chrome on Android";
pub const PASSWORD: &str = "correct-horse-9";

pub const ROOT_EMAIL: &str = "root@example.com";

/// Authenticator over a fresh in-memory database with a cheap hasher and a
/// Google provider that accepts HS256 tokens signed with `PROVIDER_SECRET`.
pub async fn setup() -> Authenticator {
    setup_at(":memory:", AuthConfig::default()).await
}

/// Like `setup`, on the database at `path` with the given config.
pub async fn setup_at(path: &str, config: AuthConfig) -> Authenticator {
    let db = Database::open(path)
        .await
        .expect("Failed to open test database");

    let registry = Arc::new(ProviderRegistry::new());
    registry.register(
        Provider::Google,
        ProviderConfig {
            client_id: GOOGLE_CLIENT_ID.to_string(),
            verifier: Arc::new(IdTokenVerifier::hmac(PROVIDER_SECRET)),
        },
    );

    let hasher = Arc::new(Argon2Hasher::with_cost(1024, 1).expect("Invalid argon2 params"));
    Authenticator::new(db, registry, hasher, config).expect("Failed to build authenticator")
}

/// A database file in the temp dir, removed with its journal files on drop.
pub struct TempDbFile {
    pub path: PathBuf,
}

impl TempDbFile {
    pub fn new(name: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Clock before epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "gatehouse-{}-{}-{}.db",
            name,
            std::process::id(),
            nanos
        ));
        Self { path }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().expect("Temp path is not UTF-8")
    }
}

impl Drop for TempDbFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Like `setup`, with user 1 (SUPER) already created and signed in.
pub async fn setup_with_root() -> (Authenticator, AuthUser) {
    let auth = setup().await;
    auth.bootstrap_super_user(NewUser::with_password(ROOT_EMAIL, "Root", "Root", PASSWORD))
        .await
        .expect("Failed to bootstrap super user");
    let root = auth
        .signin_password(ROOT_EMAIL, PASSWORD, activity())
        .await
        .expect("Failed to sign in root");
    (auth, root)
}

pub fn activity() -> Activity {
    Activity::new("203.0.113.10", DEVICE)
}

pub fn activity_on(device: &str) -> Activity {
    Activity::new("198.51.100.20", device)
}

/// Activity `offset` seconds from now on the default device.
pub fn activity_at(offset: i64) -> Activity {
    Activity {
        time: unix_now() + offset,
        ip: "203.0.113.10".to_string(),
        device: DEVICE.to_string(),
    }
}

/// Mint an ID token as the Google provider would.
pub fn google_token(email: &str) -> String {
    google_token_for(GOOGLE_CLIENT_ID, email)
}

pub fn google_token_for(audience: &str, email: &str) -> String {
    let claims = serde_json::json!({
        "sub": format!("google-{}", email),
        "aud": audience,
        "exp": unix_now() + 600,
        "email": email,
        "email_verified": true,
    });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(PROVIDER_SECRET),
    )
    .expect("Failed to mint provider token")
}

/// Sign up through email verification with the default password.
pub async fn signup(auth: &Authenticator, email: &str) -> User {
    let code = auth
        .email_verify_code(email)
        .await
        .expect("Failed to start email verification");
    let newbie = auth
        .new_user_email(&code, activity())
        .await
        .expect("Failed to redeem verification code");
    auth.create_user(&newbie, NewUser::with_password(email, "Test User", "Test", PASSWORD))
        .await
        .expect("Failed to create user")
}

/// Sign up and sign in on the default device.
pub async fn signed_in(auth: &Authenticator, email: &str) -> AuthUser {
    signup(auth, email).await;
    auth.signin_password(email, PASSWORD, activity())
        .await
        .expect("Failed to sign in")
}

pub fn auth_token(user: &AuthUser) -> String {
    user.session().expect("No session").auth_token.clone()
}

pub fn refresh_token(user: &AuthUser) -> String {
    user.session()
        .and_then(|s| s.refresh_token.clone())
        .expect("No refresh token")
}
