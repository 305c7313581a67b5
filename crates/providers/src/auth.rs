//! Per-instance credential caching.
//!
//! Backends that hand out a session cookie (EVE-NG) or a bearer token
//! (Guacamole) authenticate lazily: the first call that needs a credential
//! obtains one, every later call reuses it. There is no proactive refresh; a
//! request rejected with a cached credential invalidates the cache and the
//! caller retries once with a fresh login.

use tokio::sync::Mutex;

use sixlab_types::ProviderResult;

/// Cached authentication artifact for one provider instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Session cookie header value (`name=value; name2=value2`).
    Cookie(String),
    /// Bearer/auth token string.
    Bearer(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Self::Cookie(value) | Self::Bearer(value) => value,
        }
    }
}

/// Single-initialization credential slot.
///
/// The check-then-fetch happens under one async lock, so concurrent first
/// calls on a cold instance serialize their login instead of racing it.
#[derive(Debug, Default)]
pub struct AuthCache {
    slot: Mutex<Option<Credential>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached credential, or run `obtain` to fetch one and cache
    /// it. Failures are not cached; the next call attempts a fresh login.
    pub async fn get_or_obtain<F, Fut>(&self, obtain: F) -> ProviderResult<Credential>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<Credential>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(credential) = slot.as_ref() {
            return Ok(credential.clone());
        }
        let credential = obtain().await?;
        *slot = Some(credential.clone());
        Ok(credential)
    }

    /// Drop the cached credential so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
