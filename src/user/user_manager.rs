use super::{
    auth::PasswordHasher, AuthToken, AuthTokenValue, UserAuthCredentials, UserStore,
    UsernamePasswordCredentials,
};
use anyhow::{bail, Context, Result};
use std::{sync::Arc, time::SystemTime};
use tracing::{debug, info};

pub struct UserManager {
    user_store: Arc<dyn UserStore>,
}

impl UserManager {
    pub fn new(user_store: Arc<dyn UserStore>) -> Self {
        Self { user_store }
    }

    pub fn add_user<T: AsRef<str>>(&self, user_handle: T) -> Result<i64> {
        let user_handle = user_handle.as_ref();
        if user_handle.is_empty() {
            bail!("The user handle cannot be empty.")
        }
        if self.user_store.get_user_id(user_handle)?.is_some() {
            bail!("User handle already exists.");
        }

        let user_id = self.user_store.create_user(user_handle)?;
        info!("Created user {} ({})", user_handle, user_id);
        Ok(user_id)
    }

    pub fn get_all_user_handles(&self) -> Result<Vec<String>> {
        self.user_store.get_all_user_handles()
    }

    fn create_hashed_password(user_id: i64, password: &str) -> Result<UsernamePasswordCredentials> {
        let hasher = PasswordHasher::Argon2;
        let salt = hasher.generate_b64_salt();
        let hash = hasher.hash(password.as_bytes(), &salt)?;
        Ok(UsernamePasswordCredentials {
            user_id,
            salt,
            hash,
            hasher,
            created: SystemTime::now(),
            last_tried: None,
            last_used: None,
        })
    }

    /// Sets the user's password, replacing any previous one.
    pub fn set_password(&self, user_handle: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            bail!("The password cannot be empty.");
        }
        let mut credentials = self
            .user_store
            .get_user_auth_credentials(user_handle)?
            .with_context(|| format!("User with handle {} not found.", user_handle))?;
        credentials.username_password = Some(Self::create_hashed_password(
            credentials.user_id,
            password,
        )?);
        self.user_store.update_user_auth_credentials(credentials)
    }

    /// Returns the user's credentials when `password` matches. Unknown users
    /// and users without a password never match.
    pub fn verify_password(
        &self,
        user_handle: &str,
        password: &str,
    ) -> Result<Option<UserAuthCredentials>> {
        let Some(credentials) = self.user_store.get_user_auth_credentials(user_handle)? else {
            debug!("Login for unknown user {}", user_handle);
            return Ok(None);
        };
        let Some(password_credentials) = &credentials.username_password else {
            debug!("User {} has no password", user_handle);
            return Ok(None);
        };

        let matches = password_credentials
            .hasher
            .verify(password, password_credentials.hash.as_str())?;
        self.user_store
            .record_password_attempt(credentials.user_id, matches)?;
        Ok(matches.then_some(credentials))
    }

    pub fn generate_auth_token(&self, credentials: &UserAuthCredentials) -> Result<AuthToken> {
        let token = AuthToken {
            user_id: credentials.user_id,
            value: AuthTokenValue::generate(),
            created: SystemTime::now(),
            last_used: None,
        };
        self.user_store.add_user_auth_token(token.clone())?;
        Ok(token)
    }

    /// Looks up a session token, refreshing its last-used time.
    pub fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let token = self.user_store.get_user_auth_token(value)?;
        if token.is_some() {
            self.user_store
                .update_user_auth_token_last_used_timestamp(value)?;
        }
        Ok(token)
    }

    pub fn delete_auth_token(&self, user_id: i64, token_value: &AuthTokenValue) -> Result<()> {
        let removed = self.user_store.delete_user_auth_token(token_value)?;
        match removed {
            Some(removed) => {
                if removed.user_id == user_id {
                    Ok(())
                } else {
                    self.user_store.add_user_auth_token(removed.clone())?;
                    bail!(
                        "Tried to delete an auth token of user {}, but the authenticated user is {}.",
                        removed.user_id,
                        user_id
                    )
                }
            }
            None => bail!("Did not find auth token"),
        }
    }
}
