use anyhow::{Context, Result};
use keyring::Entry;

pub const KEYRING_SERVICE: &str = "graphreq";
pub const DEFAULT_ACCOUNT: &str = "default";

/// Source of bearer tokens. Implementations are expected to hand out an
/// already-valid token; acquiring or refreshing one happens elsewhere.
pub trait TokenProvider: Send + Sync {
    fn token(&self, account_id: Option<&str>) -> Result<String>;
}

/// Hands out the same token for every account.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self, _account_id: Option<&str>) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads tokens from the OS keyring, one entry per account.
#[derive(Debug, Clone)]
pub struct KeyringTokenProvider {
    service: String,
}

impl Default for KeyringTokenProvider {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringTokenProvider {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl TokenProvider for KeyringTokenProvider {
    fn token(&self, account_id: Option<&str>) -> Result<String> {
        let user = account_id.unwrap_or(DEFAULT_ACCOUNT);
        let entry = Entry::new(&self.service, user)?;
        let secret = entry
            .get_secret()
            .with_context(|| format!("No access token stored in the OS keyring for '{user}'"))?;
        Ok(String::from_utf8(secret)?)
    }
}

pub fn set_token_keyring(account_id: Option<&str>, token: &str) -> Result<()> {
    let user = account_id.unwrap_or(DEFAULT_ACCOUNT);
    let entry = Entry::new(KEYRING_SERVICE, user)?;
    entry.set_secret(token.as_bytes())?;
    Ok(())
}
