use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password::PasswordHasher,
        repo_types::{NewUser, User},
    },
    error::{AppError, AppResult},
    storage::UserStore,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Credential store: owns user creation and password verification on top of
/// a [`UserStore`].
pub struct Credentials<'a> {
    users: &'a dyn UserStore,
    hasher: &'a PasswordHasher,
}

impl<'a> Credentials<'a> {
    pub fn new(users: &'a dyn UserStore, hasher: &'a PasswordHasher) -> Self {
        Self { users, hasher }
    }

    /// Register a new user. The plaintext password is consumed by the hashing task.
    pub async fn create(&self, email: &str, username: &str, password: String) -> AppResult<User> {
        let email = normalize_email(email);

        if self.users.get_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::AlreadyExists("Email already registered".into()));
        }

        let password_hash = self.hasher.hash_blocking(password).await.map_err(|e| {
            error!(error = %e, "hash_password failed");
            AppError::internal("Failed to hash password")
        })?;

        let user = self
            .users
            .insert(NewUser {
                email,
                username: username.trim().to_string(),
                password_hash,
            })
            .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Unknown email and wrong password fail identically.
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<User> {
        let email = normalize_email(email);

        let Some(user) = self.users.get_by_email(&email).await? else {
            self.hasher.verify_dummy_blocking(password.to_string()).await;
            warn!("login with unknown email");
            return Err(AppError::InvalidCredentials);
        };

        let ok = self
            .hasher
            .verify_blocking(password.to_string(), user.password_hash.clone())
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, user_id = %user.id, "stored password hash unreadable");
                false
            });

        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<User> {
        self.users.get_by_id(id).await
    }

    pub async fn get_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.users.get_by_email(&normalize_email(email)).await
    }
}

/// Username for display, "Unknown" when the user cannot be loaded.
pub(crate) async fn display_name(users: &dyn UserStore, id: Uuid) -> String {
    match users.get_by_id(id).await {
        Ok(user) => user.username,
        Err(_) => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada example.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_and_first_user_kept() {
        let state = AppState::fake().await;
        let creds = Credentials::new(state.store.users(), &state.hasher);

        let first = creds
            .create("ada@example.com", "ada", "first-password".into())
            .await
            .expect("first registration");
        let err = creds
            .create("  ADA@example.com ", "imposter", "second-password".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));

        let stored = creds
            .get_by_email("ada@example.com")
            .await
            .unwrap()
            .expect("user still there");
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.username, "ada");
        assert!(creds.authenticate("ada@example.com", "first-password").await.is_ok());
    }

    #[tokio::test]
    async fn new_users_are_authenticated_and_hash_is_not_plaintext() {
        let state = AppState::fake().await;
        let creds = Credentials::new(state.store.users(), &state.hasher);
        let user = creds
            .create("bob@example.com", "bob", "hunter22".into())
            .await
            .unwrap();
        assert!(user.authenticated);
        assert_ne!(user.password_hash, "hunter22");

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains(&user.password_hash));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let state = AppState::fake().await;
        let creds = Credentials::new(state.store.users(), &state.hasher);
        creds
            .create("eve@example.com", "eve", "right-password".into())
            .await
            .unwrap();

        let wrong_password = creds
            .authenticate("eve@example.com", "wrong-password")
            .await
            .unwrap_err();
        let unknown_email = creds
            .authenticate("nobody@example.com", "right-password")
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidCredentials));
        assert!(matches!(unknown_email, AppError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.code(), unknown_email.code());
    }

    #[tokio::test]
    async fn lookups() {
        let state = AppState::fake().await;
        let creds = Credentials::new(state.store.users(), &state.hasher);
        let user = creds
            .create("kim@example.com", "kim", "password1".into())
            .await
            .unwrap();

        assert_eq!(creds.get_by_id(user.id).await.unwrap().email, "kim@example.com");
        assert!(creds.get_by_id(Uuid::new_v4()).await.unwrap_err().is_not_found());
        assert!(creds.get_by_email("missing@example.com").await.unwrap().is_none());
        assert_eq!(display_name(state.store.users(), user.id).await, "kim");
        assert_eq!(display_name(state.store.users(), Uuid::new_v4()).await, "Unknown");
    }

    #[tokio::test]
    async fn update_rewrites_profile_fields() {
        let state = AppState::fake().await;
        let creds = Credentials::new(state.store.users(), &state.hasher);
        let mut user = creds
            .create("lee@example.com", "lee", "password1".into())
            .await
            .unwrap();

        user.username = "lee2".into();
        user.authenticated = false;
        state.store.users().update(&user).await.unwrap();

        let stored = creds.get_by_id(user.id).await.unwrap();
        assert_eq!(stored.username, "lee2");
        assert!(!stored.authenticated);

        let mut ghost = stored.clone();
        ghost.id = Uuid::new_v4();
        assert!(state.store.users().update(&ghost).await.unwrap_err().is_not_found());
    }
}
